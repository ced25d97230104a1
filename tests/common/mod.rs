//! Shared fixtures for the Postgres-backed integration tests.
//!
//! Tests return early when `TEST_DATABASE_URL` is unset.

#![allow(dead_code, clippy::panic, missing_docs)]

use std::time::Duration;

use restkit::config::DatabaseConfig;
use restkit::db::Client;
use restkit::logging::{Logger, Redactor};
use sqlx::postgres::PgPoolOptions;

/// Connects and migrates, or returns `None` when no test database is
/// configured.
pub async fn client() -> Option<Client> {
    client_with_query_timeout(Duration::from_secs(5)).await
}

/// Like [`client`] with a custom per-call timeout.
pub async fn client_with_query_timeout(query_timeout: Duration) -> Option<Client> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = match PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&url)
        .await
    {
        Ok(pool) => pool,
        Err(err) => panic!("TEST_DATABASE_URL is set but unreachable: {err}"),
    };
    let config = DatabaseConfig {
        query_timeout,
        ..DatabaseConfig::default()
    };
    let logger = Logger::new(Redactor::new(["password", "profile.ssn"]));
    let client = Client::from_pool(pool, config, logger);
    if let Err(err) = client.migrate().await {
        panic!("migrations failed: {err}");
    }
    Some(client)
}

/// An email that no other test run uses.
pub fn unique_email() -> String {
    format!("{}@example.com", uuid::Uuid::new_v4())
}

/// Counts users with `email`, outside any transaction.
pub async fn user_count(client: &Client, email: &str) -> i64 {
    match client
        .query_row::<(i64,)>(
            "SELECT COUNT(*) FROM users WHERE email = $1",
            &restkit::args![email],
        )
        .await
    {
        Ok((n,)) => n,
        Err(err) => panic!("count failed: {err}"),
    }
}
