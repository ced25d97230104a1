//! Correlation-scoped structured logger.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::redact::Redactor;

/// Severity of a [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose diagnostics (per-query records).
    Debug,
    /// Normal operation.
    Info,
    /// Something degraded but the operation continued.
    Warn,
    /// An operation failed.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One structured log entry, exactly as emitted.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    /// Trace id of the operation that produced the entry.
    pub correlation_id: String,
    /// Entry severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Emitting process id.
    pub pid: u32,
    /// Emitting host.
    pub hostname: String,
    /// Redacted metadata, if any was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug)]
struct Shared {
    redactor: Redactor,
    pid: u32,
    hostname: String,
}

/// Structured log sink that redacts metadata before emission.
///
/// Cheap to clone: the redactor and host identity are shared, while the
/// correlation id is per value. Derive a logger per unit of work with
/// [`Logger::with_trace_id`].
#[derive(Debug, Clone)]
pub struct Logger {
    shared: Arc<Shared>,
    correlation_id: String,
    skip_redaction: bool,
}

impl Logger {
    /// Creates a root logger with an empty correlation id.
    #[must_use]
    pub fn new(redactor: Redactor) -> Self {
        Self {
            shared: Arc::new(Shared {
                redactor,
                pid: std::process::id(),
                hostname: resolve_hostname(),
            }),
            correlation_id: String::new(),
            skip_redaction: false,
        }
    }

    /// Returns a logger sharing this one's configuration but tagged with
    /// `trace_id`. Redaction is always re-enabled on the derived logger.
    #[must_use]
    pub fn with_trace_id(&self, trace_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            correlation_id: trace_id.into(),
            skip_redaction: false,
        }
    }

    /// Returns a logger that emits metadata verbatim.
    ///
    /// Only for local diagnostic call sites; never hand it to request or
    /// event code.
    #[must_use]
    pub fn unredacted(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            correlation_id: self.correlation_id.clone(),
            skip_redaction: true,
        }
    }

    /// The correlation (trace) id carried by this logger.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.correlation_id
    }

    /// The redactor shared by every logger derived from the same root.
    #[must_use]
    pub fn redactor(&self) -> &Redactor {
        &self.shared.redactor
    }

    /// Builds the record that [`Logger::log`] would emit.
    #[must_use]
    pub fn record(&self, level: LogLevel, message: &str, metadata: Option<&Value>) -> LogRecord {
        let metadata = if self.skip_redaction {
            metadata.cloned()
        } else {
            self.shared.redactor.redact(metadata)
        };
        LogRecord {
            correlation_id: self.correlation_id.clone(),
            level,
            message: message.to_string(),
            timestamp: Utc::now(),
            pid: self.shared.pid,
            hostname: self.shared.hostname.clone(),
            metadata,
        }
    }

    /// Redacts `metadata` and emits a single record.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Option<&Value>) {
        emit(&self.record(level, message, metadata));
    }

    /// Emits at [`LogLevel::Debug`].
    pub fn debug(&self, message: &str, metadata: Option<&Value>) {
        self.log(LogLevel::Debug, message, metadata);
    }

    /// Emits at [`LogLevel::Info`].
    pub fn info(&self, message: &str, metadata: Option<&Value>) {
        self.log(LogLevel::Info, message, metadata);
    }

    /// Emits at [`LogLevel::Warn`].
    pub fn warn(&self, message: &str, metadata: Option<&Value>) {
        self.log(LogLevel::Warn, message, metadata);
    }

    /// Emits at [`LogLevel::Error`].
    pub fn error(&self, message: &str, metadata: Option<&Value>) {
        self.log(LogLevel::Error, message, metadata);
    }
}

fn emit(record: &LogRecord) {
    let metadata = record
        .metadata
        .as_ref()
        .map(Value::to_string)
        .unwrap_or_default();
    let timestamp = record.timestamp.to_rfc3339();

    macro_rules! forward {
        ($level:expr) => {
            tracing::event!(
                $level,
                correlation_id = %record.correlation_id,
                timestamp = %timestamp,
                pid = record.pid,
                hostname = %record.hostname,
                metadata = %metadata,
                "{}",
                record.message
            )
        };
    }

    match record.level {
        LogLevel::Debug => forward!(tracing::Level::DEBUG),
        LogLevel::Info => forward!(tracing::Level::INFO),
        LogLevel::Warn => forward!(tracing::Level::WARN),
        LogLevel::Error => forward!(tracing::Level::ERROR),
    }
}

fn resolve_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn logger() -> Logger {
        Logger::new(Redactor::new(["password"]))
    }

    #[test]
    fn record_redacts_metadata() {
        let meta = json!({"password": "secret", "user": "john"});
        let record = logger().record(LogLevel::Info, "login", Some(&meta));
        assert_eq!(
            record.metadata,
            Some(json!({"password": "[Redacted]", "user": "john"}))
        );
        assert_eq!(meta.get("password"), Some(&json!("secret")));
    }

    #[test]
    fn record_carries_identity() {
        let record = logger()
            .with_trace_id("trace-1")
            .record(LogLevel::Warn, "hello", None);
        assert_eq!(record.correlation_id, "trace-1");
        assert_eq!(record.level, LogLevel::Warn);
        assert_eq!(record.pid, std::process::id());
        assert!(!record.hostname.is_empty());
        assert!(record.metadata.is_none());
    }

    #[test]
    fn unredacted_is_opt_in_and_not_inherited() {
        let meta = json!({"password": "secret"});
        let raw = logger().unredacted();
        let record = raw.record(LogLevel::Debug, "diag", Some(&meta));
        assert_eq!(record.metadata, Some(meta.clone()));

        let derived = raw.with_trace_id("t");
        let record = derived.record(LogLevel::Debug, "diag", Some(&meta));
        assert_eq!(record.metadata, Some(json!({"password": "[Redacted]"})));
    }

    #[test]
    fn record_serializes_with_lowercase_level() {
        let record = logger().record(LogLevel::Error, "boom", None);
        let Ok(json) = serde_json::to_value(&record) else {
            panic!("record must serialize");
        };
        assert_eq!(json.get("level"), Some(&json!("error")));
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn emitting_does_not_panic_without_subscriber() {
        logger().info("no subscriber installed", Some(&json!({"k": 1})));
    }
}
