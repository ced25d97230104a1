//! Event handling errors.

use crate::alert::Severity;
use crate::db::DbError;

/// A single handler's failure.
///
/// Captured by the dispatcher and reported by the event manager as a log
/// entry and, above the configured severity, an alert. Never surfaced to
/// the code that raised the event.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("{message}")]
    Failed {
        /// What went wrong.
        message: String,
        /// How urgently it needs attention.
        severity: Severity,
    },

    /// The handler task panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// A failure at [`Severity::Error`].
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_severity(message, Severity::Error)
    }

    /// A failure at the given severity.
    pub fn with_severity(message: impl Into<String>, severity: Severity) -> Self {
        Self::Failed {
            message: message.into(),
            severity,
        }
    }

    /// Severity used for alert routing. Panics are always critical.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Failed { severity, .. } => *severity,
            Self::Panicked(_) => Severity::Critical,
        }
    }
}

impl From<DbError> for HandlerError {
    fn from(err: DbError) -> Self {
        Self::new(err.to_string())
    }
}

/// Registry mutation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The same handler instance is already registered for this name.
    #[error("handler already registered for event {0:?}")]
    DuplicateHandler(String),
}
