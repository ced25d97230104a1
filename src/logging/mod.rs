//! Structured logging: process-wide `tracing` setup and the redacting
//! [`Logger`] that every query, error and event payload passes through.

pub mod logger;
pub mod redact;

pub use logger::{LogLevel, LogRecord, Logger};
pub use redact::{REDACTED, Redactor};

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Installs the global `tracing` subscriber.
///
/// Honours `RUST_LOG`, defaulting to `info`. Calling it twice is harmless:
/// the second installation attempt is ignored.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
