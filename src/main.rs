//! restkit server entry point.
//!
//! Wires configuration, the storage client, cache, alerting and the event
//! manager, then serves the REST API until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;

use restkit::alert::{AlertSink, LogAlertSink, WebhookAlertSink};
use restkit::api;
use restkit::app_state::AppState;
use restkit::cache::{Cache, MemoryCache};
use restkit::config::AppConfig;
use restkit::db::Client;
use restkit::events::EventManager;
use restkit::logging::{Logger, Redactor, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env()?;
    init_tracing(&config.log);
    tracing::info!(addr = %config.listen_addr, "starting restkit");

    let logger = Logger::new(Redactor::new(&config.log.redact_keys));

    // Storage is the only fatal dependency
    let client = Client::connect(config.database.clone(), logger.clone())
        .await
        .context("connecting to postgres")?;
    if config.database.auto_migrate {
        client.migrate().await.context("applying migrations")?;
    }

    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let alerts: Arc<dyn AlertSink> = match &config.alert.webhook_url {
        Some(url) => Arc::new(WebhookAlertSink::new(url.as_str())),
        None => Arc::new(LogAlertSink),
    };
    let events = EventManager::new(
        client.copy(),
        Arc::clone(&cache),
        alerts,
        config.alert.min_severity,
    )
    .await
    .context("registering event handlers")?;

    let client = Arc::new(client);
    let app_state = AppState {
        client: Arc::clone(&client),
        events: Arc::new(events),
        cache,
        cache_ttl: config.cache_default_ttl,
    };

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, api::app(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    client.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
