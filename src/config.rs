//! Service configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Values are read once at startup and
//! never mutated afterwards.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::alert::Severity;

/// Configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Environment variable name.
        key: &'static str,
        /// Parser message.
        reason: String,
    },
}

/// Top-level service configuration.
///
/// Loaded once at startup via [`AppConfig::from_env`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,
    /// Database connection and pool settings.
    pub database: DatabaseConfig,
    /// Structured logging settings.
    pub log: LogConfig,
    /// Out-of-band alert settings.
    pub alert: AlertConfig,
    /// Default time-to-live for cached entries.
    pub cache_default_ttl: Duration,
}

/// Connection parameters and pool tuning for the Postgres client.
///
/// Immutable after construction. The custom `Debug` masks the password.
#[derive(Clone)]
pub struct DatabaseConfig {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login role.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Database (schema) name.
    pub name: String,
    /// `application_name` reported to the server.
    pub app_name: String,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Connections kept open while idle.
    pub min_idle_connections: u32,
    /// Maximum lifetime of a pooled connection.
    pub conn_max_lifetime: Duration,
    /// Idle connections are closed after this long.
    pub idle_timeout: Duration,
    /// Upper bound on every Exec/Query/QueryRow call and on begin/commit/rollback.
    pub query_timeout: Duration,
    /// Timeout for acquiring a connection from the pool.
    pub connect_timeout: Duration,
    /// Emit a log record for each query.
    pub logging_enabled: bool,
    /// Run embedded migrations at startup.
    pub auto_migrate: bool,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[Redacted]")
            .field("name", &self.name)
            .field("app_name", &self.app_name)
            .field("max_connections", &self.max_connections)
            .field("min_idle_connections", &self.min_idle_connections)
            .field("conn_max_lifetime", &self.conn_max_lifetime)
            .field("idle_timeout", &self.idle_timeout)
            .field("query_timeout", &self.query_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("logging_enabled", &self.logging_enabled)
            .field("auto_migrate", &self.auto_migrate)
            .finish()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "restkit".to_string(),
            password: "restkit".to_string(),
            name: "restkit".to_string(),
            app_name: "restkit".to_string(),
            max_connections: 10,
            min_idle_connections: 2,
            conn_max_lifetime: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
            query_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            logging_enabled: true,
            auto_migrate: false,
        }
    }
}

impl DatabaseConfig {
    /// Reads the `DB_*` variables, falling back to [`DatabaseConfig::default`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `DB_PORT` is set but is not a port.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let port = match std::env::var("DB_PORT") {
            Ok(raw) => raw.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Invalid {
                    key: "DB_PORT",
                    reason: e.to_string(),
                }
            })?,
            Err(_) => defaults.port,
        };

        Ok(Self {
            host: std::env::var("DB_HOST").unwrap_or(defaults.host),
            port,
            user: std::env::var("DB_USER").unwrap_or(defaults.user),
            password: std::env::var("DB_PASSWORD").unwrap_or(defaults.password),
            name: std::env::var("DB_NAME").unwrap_or(defaults.name),
            app_name: std::env::var("DB_APP_NAME").unwrap_or(defaults.app_name),
            max_connections: parse_env("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_idle_connections: parse_env(
                "DB_MIN_IDLE_CONNECTIONS",
                defaults.min_idle_connections,
            ),
            conn_max_lifetime: Duration::from_secs(parse_env(
                "DB_CONN_MAX_LIFETIME_SECS",
                defaults.conn_max_lifetime.as_secs(),
            )),
            idle_timeout: Duration::from_secs(parse_env(
                "DB_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )),
            query_timeout: Duration::from_millis(parse_env(
                "DB_QUERY_TIMEOUT_MS",
                10_000,
            )),
            connect_timeout: Duration::from_secs(parse_env(
                "DB_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )),
            logging_enabled: parse_env_bool("DB_LOGGING_ENABLED", defaults.logging_enabled),
            auto_migrate: parse_env_bool("DB_AUTO_MIGRATE", defaults.auto_migrate),
        })
    }
}

/// Structured logging settings.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Metadata keys masked before emission. Dotted paths address nested
    /// fields; matching is case-insensitive.
    pub redact_keys: Vec<String>,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

/// Out-of-band alert settings.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Slack-compatible incoming webhook. Alerts go to the log when unset.
    pub webhook_url: Option<String>,
    /// Handler failures below this severity are logged but not alerted.
    pub min_severity: Severity,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            min_severity: Severity::Error,
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `LISTEN_ADDR`, `DB_PORT` or
    /// `ALERT_MIN_SEVERITY` is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "LISTEN_ADDR",
                reason: e.to_string(),
            })?;

        let database = DatabaseConfig::from_env()?;

        let log = LogConfig {
            redact_keys: parse_env_list("LOG_REDACT_KEYS", &["password", "token", "secret"]),
            json: std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")),
        };

        let min_severity = match std::env::var("ALERT_MIN_SEVERITY") {
            Ok(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "ALERT_MIN_SEVERITY",
                reason,
            })?,
            Err(_) => Severity::Error,
        };
        let alert = AlertConfig {
            webhook_url: std::env::var("ALERT_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            min_severity,
        };

        let cache_default_ttl = Duration::from_secs(parse_env("CACHE_DEFAULT_TTL_SECS", 300));

        Ok(Self {
            listen_addr,
            database,
            log,
            alert,
            cache_default_ttl,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}

/// Parses a comma-separated list, trimming blanks. An unset variable yields
/// `default`; a set-but-empty one yields an empty list.
fn parse_env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => split_list(&raw),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
