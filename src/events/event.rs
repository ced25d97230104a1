//! The event value delivered to handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Built-in event names.
pub mod names {
    /// A user row was inserted.
    pub const USER_REGISTERED: &str = "user.registered";
    /// A user row was modified.
    pub const USER_UPDATED: &str = "user.updated";
    /// A user row was deleted.
    pub const USER_DELETED: &str = "user.deleted";
}

/// A named notification with an arbitrary JSON payload.
///
/// `created_at` and `trace_id` are filled in at dispatch time when unset,
/// before fan-out, so every handler of one dispatch sees the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Registry key, e.g. `"user.registered"`.
    pub name: String,
    /// When the event was raised.
    pub created_at: Option<DateTime<Utc>>,
    /// Trace id of the operation that raised the event.
    pub trace_id: Option<String>,
    /// Event-specific data.
    pub payload: Value,
}

impl Event {
    /// Creates an event with no timestamp or trace id yet.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            created_at: None,
            trace_id: None,
            payload,
        }
    }

    /// Sets the trace id. An empty id counts as unset.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        let trace_id = trace_id.into();
        self.trace_id = (!trace_id.is_empty()).then_some(trace_id);
        self
    }

    /// Fills `created_at` with now and `trace_id` with a fresh UUID v4 where
    /// they are unset. Values already present are kept.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        if self.created_at.is_none() {
            self.created_at = Some(Utc::now());
        }
        if self.trace_id.as_deref().is_none_or(str::is_empty) {
            self.trace_id = Some(uuid::Uuid::new_v4().to_string());
        }
        self
    }

    /// The trace id, or `""` when unset.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        self.trace_id.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_fill_only_missing_fields() {
        let at = Utc::now() - chrono::Duration::hours(1);
        let mut event = Event::new(names::USER_REGISTERED, json!({})).with_trace_id("t-1");
        event.created_at = Some(at);

        let event = event.with_defaults();
        assert_eq!(event.trace_id(), "t-1");
        assert_eq!(event.created_at, Some(at));
    }

    #[test]
    fn defaults_generate_trace_and_timestamp() {
        let event = Event::new("x", json!(null)).with_defaults();
        assert!(event.created_at.is_some());
        assert_eq!(event.trace_id().len(), 36);
    }

    #[test]
    fn empty_trace_id_counts_as_unset() {
        let event = Event::new("x", json!(null)).with_trace_id("");
        assert!(event.trace_id.is_none());
    }
}
