//! Bind arguments for [`super::Client`] calls.
//!
//! Arguments are a closed set of owned values so that they can be both
//! bound to a statement and recorded in the [`super::QueryLog`].

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use sqlx::Arguments;
use sqlx::postgres::PgArguments;
use uuid::Uuid;

use super::DbError;
use crate::logging::REDACTED;

/// A single positional bind value (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlArg {
    /// SQL `NULL`, sent as an untyped text null. Cast in SQL (`$1::int`)
    /// when the column is not textual.
    Null,
    /// `BOOLEAN`.
    Bool(bool),
    /// `INTEGER`.
    Int(i32),
    /// `BIGINT`.
    BigInt(i64),
    /// `DOUBLE PRECISION`.
    Float(f64),
    /// `TEXT`.
    Text(String),
    /// `UUID`.
    Uuid(Uuid),
    /// `TIMESTAMPTZ`.
    Timestamp(DateTime<Utc>),
    /// `JSONB`.
    Json(serde_json::Value),
    /// A value bound as-is but recorded as `[Redacted]` in query logs.
    #[serde(serialize_with = "serialize_redacted")]
    Secret(Box<SqlArg>),
}

impl SqlArg {
    /// Marks `value` as sensitive: bound normally, never logged.
    pub fn secret(value: impl Into<SqlArg>) -> Self {
        Self::Secret(Box::new(value.into()))
    }
}

fn serialize_redacted<T, S: Serializer>(_value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(REDACTED)
}

impl From<bool> for SqlArg {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlArg {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for SqlArg {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f64> for SqlArg {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlArg {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlArg {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&String> for SqlArg {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<Uuid> for SqlArg {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<DateTime<Utc>> for SqlArg {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<serde_json::Value> for SqlArg {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<SqlArg>> From<Option<T>> for SqlArg {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Builds a `Vec<SqlArg>` from heterogeneous values.
///
/// ```
/// let args = restkit::args![1_i64, "alice", true];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::db::SqlArg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::db::SqlArg::from($arg)),+]
    };
}

/// Encodes `args` into a Postgres argument buffer.
pub(crate) fn encode(args: &[SqlArg]) -> Result<PgArguments, DbError> {
    let mut out = PgArguments::default();
    for arg in args {
        add(&mut out, arg)
            .map_err(|e| DbError::Query(format!("failed to encode argument: {e}")))?;
    }
    Ok(out)
}

fn add(out: &mut PgArguments, arg: &SqlArg) -> Result<(), sqlx::error::BoxDynError> {
    match arg {
        SqlArg::Null => out.add(Option::<String>::None),
        SqlArg::Bool(v) => out.add(*v),
        SqlArg::Int(v) => out.add(*v),
        SqlArg::BigInt(v) => out.add(*v),
        SqlArg::Float(v) => out.add(*v),
        SqlArg::Text(v) => out.add(v.clone()),
        SqlArg::Uuid(v) => out.add(*v),
        SqlArg::Timestamp(v) => out.add(*v),
        SqlArg::Json(v) => out.add(v.clone()),
        SqlArg::Secret(inner) => add(out, inner),
    }
}
