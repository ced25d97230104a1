//! Per-call query bookkeeping.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use super::SqlArg;
use crate::logging::Redactor;

/// Immutable record of one Exec/Query/QueryRow call.
///
/// A client keeps only the most recent entry; see
/// [`super::Client::last_query`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryLog {
    /// Trace id of the client that issued the call.
    pub trace_id: String,
    /// SQL text as submitted.
    pub query: String,
    /// Positional bind values.
    pub args: Vec<SqlArg>,
    /// When the call started.
    pub started_at: DateTime<Utc>,
    /// When the call returned, successfully or not.
    pub finished_at: DateTime<Utc>,
    /// Error text for a failed call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl QueryLog {
    /// Elapsed wall time, never negative.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        (self.finished_at - self.started_at).max(chrono::Duration::zero())
    }

    /// Whether the call failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }

    /// Log metadata for this entry.
    ///
    /// Bind values have no key of their own, so each one is redacted as a
    /// fragment here; [`SqlArg::Secret`] binds are always masked.
    #[must_use]
    pub fn to_metadata(&self, redactor: &Redactor) -> Value {
        let args: Vec<Value> = self
            .args
            .iter()
            .map(|arg| redactor.redact_fragment(&serde_json::to_value(arg).unwrap_or_default()))
            .collect();
        json!({
            "query": self.query,
            "args": args,
            "started_at": self.started_at.to_rfc3339(),
            "finished_at": self.finished_at.to_rfc3339(),
            "duration_ms": self.duration().num_milliseconds(),
            "error": self.error_message,
        })
    }
}

/// Opens a [`QueryLog`] when a call starts; [`PendingQuery::finish`] seals it.
#[derive(Debug)]
pub(crate) struct PendingQuery {
    trace_id: String,
    query: String,
    args: Vec<SqlArg>,
    started_at: DateTime<Utc>,
}

impl PendingQuery {
    pub(crate) fn start(trace_id: &str, query: &str, args: &[SqlArg]) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            query: query.to_string(),
            args: args.to_vec(),
            started_at: Utc::now(),
        }
    }

    pub(crate) fn finish(self, error: Option<String>) -> QueryLog {
        // Clamp against wall-clock steps backwards.
        let finished_at = Utc::now().max(self.started_at);
        QueryLog {
            trace_id: self.trace_id,
            query: self.query,
            args: self.args,
            started_at: self.started_at,
            finished_at,
            error_message: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, Logger};

    #[test]
    fn finish_records_error_and_orders_timestamps() {
        let pending = PendingQuery::start("t-1", "SELECT 1", &crate::args![1_i32]);
        let log = pending.finish(Some("relation does not exist".to_string()));
        assert!(log.is_error());
        assert!(log.finished_at >= log.started_at);
        assert!(log.duration() >= chrono::Duration::zero());
        assert_eq!(log.trace_id, "t-1");
    }

    #[test]
    fn metadata_carries_query_and_args() {
        let log = PendingQuery::start("t", "SELECT $1", &crate::args!["x"]).finish(None);
        let meta = log.to_metadata(&Redactor::default());
        assert_eq!(meta.get("query"), Some(&json!("SELECT $1")));
        assert_eq!(meta.get("args"), Some(&json!(["x"])));
        assert_eq!(meta.get("error"), Some(&Value::Null));
    }

    #[test]
    fn sensitive_binds_never_reach_the_log() {
        let redactor = Redactor::new(["password", "profile.ssn"]);
        let log = PendingQuery::start(
            "t",
            "INSERT INTO users (id, email, name, profile, password_hash) VALUES ($1, $2, $3, $4, $5)",
            &crate::args![
                uuid::Uuid::new_v4(),
                "a@b.io",
                "Eve",
                json!({"city": "Lisbon", "ssn": "123-45-6789"}),
                SqlArg::secret("hunter2"),
            ],
        )
        .finish(None);

        let record = Logger::new(redactor.clone()).record(
            LogLevel::Debug,
            "query executed",
            Some(&log.to_metadata(&redactor)),
        );
        let emitted = serde_json::to_string(&record).unwrap_or_default();
        assert!(!emitted.contains("123-45-6789"), "ssn leaked: {emitted}");
        assert!(!emitted.contains("hunter2"), "secret leaked: {emitted}");
        assert!(emitted.contains("Lisbon"));
        assert!(emitted.contains("a@b.io"));
    }
}
