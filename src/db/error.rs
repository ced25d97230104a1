//! Storage error taxonomy.

use std::time::Duration;

/// Boxed error used for after-commit hooks and wrapped transaction causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by [`super::Client`].
///
/// Every per-call failure is returned as a value; only [`DbError::Connection`]
/// at startup is treated as fatal by the binary.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The initial pool could not be established.
    #[error("database connection failed: {0}")]
    Connection(String),

    /// The driver rejected or failed a statement.
    #[error("query failed: {0}")]
    Query(String),

    /// A unique or exclusion constraint rejected the write.
    #[error("constraint violated: {0}")]
    Conflict(String),

    /// `query_row` found nothing. Callers map this to a domain not-found.
    #[error("no rows in result set")]
    NoRows,

    /// The call exceeded the configured query timeout.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// A statement was issued on a transaction that already committed or
    /// rolled back.
    #[error("transaction already finished")]
    TransactionClosed,

    /// The transaction body failed and the rollback failed too.
    #[error("rollback failed: {rollback} (original error: {cause})")]
    Rollback {
        /// The error returned by the transaction body.
        #[source]
        cause: BoxError,
        /// The rollback failure.
        rollback: String,
    },

    /// Embedded migrations could not be applied.
    #[error("migration failed: {0}")]
    Migration(String),
}

impl DbError {
    /// Whether this is the distinct "no rows" condition.
    #[must_use]
    pub const fn is_no_rows(&self) -> bool {
        matches!(self, Self::NoRows)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NoRows,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.constraint().unwrap_or(db.message()).to_string())
            }
            other => Self::Query(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn row_not_found_maps_to_no_rows() {
        assert!(DbError::from(sqlx::Error::RowNotFound).is_no_rows());
        assert!(!DbError::from(sqlx::Error::PoolTimedOut).is_no_rows());
    }

    #[test]
    fn rollback_keeps_both_errors() {
        let err = DbError::Rollback {
            cause: Box::new(DbError::Query("duplicate key".to_string())),
            rollback: "connection reset".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("duplicate key"));
        assert!(text.contains("connection reset"));
        assert!(err.source().is_some());
    }
}
