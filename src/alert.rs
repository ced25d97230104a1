//! Out-of-band alerting for failed side effects.
//!
//! An [`Alert`] is a flat list of labelled fields plus a [`Severity`]. The
//! core only needs [`AlertSink::send`]; delivery is always launched on a
//! background task by the caller so it never sits on a request's critical
//! path.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;

/// How urgently a failure needs a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; never paged.
    Info,
    /// Degraded but self-healing.
    Warning,
    /// A side effect was lost.
    Error,
    /// Data integrity or security is at stake.
    Critical,
}

impl Severity {
    /// Emoji-free marker used as the alert title prefix.
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Info => "[INFO]",
            Self::Warning => "[WARNING]",
            Self::Error => "[ERROR]",
            Self::Critical => "[CRITICAL]",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity {other:?}")),
        }
    }
}

/// One labelled line of an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertField {
    /// Field label.
    pub label: String,
    /// Field value.
    pub value: String,
}

impl AlertField {
    /// Creates a field.
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// An alert ready for delivery.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// Urgency marker.
    pub severity: Severity,
    /// Labelled fields, rendered in order.
    pub fields: Vec<AlertField>,
}

impl Alert {
    /// Renders the alert as plain text, one `label: value` line per field.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = self.severity.marker().to_string();
        for field in &self.fields {
            out.push('\n');
            out.push_str(&field.label);
            out.push_str(": ");
            out.push_str(&field.value);
        }
        out
    }
}

/// Delivery failed.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// The HTTP request could not be sent.
    #[error("alert transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The receiver answered with a non-success status.
    #[error("alert rejected with status {0}")]
    Rejected(u16),
}

/// Anything that can deliver an [`Alert`].
#[async_trait]
pub trait AlertSink: Send + Sync + fmt::Debug {
    /// Delivers `alert`.
    ///
    /// # Errors
    ///
    /// Returns an [`AlertError`] when delivery fails.
    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Writes alerts to the process log. Used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        tracing::warn!(severity = %alert.severity, alert = %alert.render(), "alert raised");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    text: &'a str,
}

/// Posts alerts to a Slack-compatible incoming webhook.
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    /// Creates a sink posting to `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let text = alert.render();
        let response = self
            .http
            .post(&self.url)
            .json(&WebhookBody { text: &text })
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AlertError::Rejected(status.as_u16()))
        }
    }
}
