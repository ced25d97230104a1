//! Built-in handlers registered by [`super::EventManager::new`].

use async_trait::async_trait;

use super::dispatcher::EventHandler;
use super::error::HandlerError;
use super::event::Event;
use super::manager::HandlerContext;
use crate::alert::Severity;
use crate::args;

/// Cache key under which a user's JSON representation is stored.
#[must_use]
pub fn user_cache_key(id: &str) -> String {
    format!("user:{id}")
}

/// Appends every user lifecycle event to `audit_events`.
///
/// The payload is redacted before it is stored; the row carries the trace
/// id of the operation that raised the event.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditTrailHandler;

#[async_trait]
impl EventHandler<HandlerContext> for AuditTrailHandler {
    fn name(&self) -> &str {
        "audit-trail"
    }

    async fn handle(&self, ctx: &HandlerContext, event: &Event) -> Result<(), HandlerError> {
        let payload = ctx.logger.redactor().redact_value(&event.payload);
        ctx.client
            .exec(
                "INSERT INTO audit_events (trace_id, event_name, payload, created_at) \
                 VALUES ($1, $2, $3, $4)",
                &args![event.trace_id(), event.name.as_str(), payload, event.created_at],
            )
            .await?;
        Ok(())
    }
}

/// Drops the cached copy of a user after it changes.
///
/// Expects `{"id": "<uuid>"}` in the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheInvalidationHandler;

#[async_trait]
impl EventHandler<HandlerContext> for CacheInvalidationHandler {
    fn name(&self) -> &str {
        "cache-invalidation"
    }

    async fn handle(&self, ctx: &HandlerContext, event: &Event) -> Result<(), HandlerError> {
        let Some(id) = event.payload.get("id").and_then(|v| v.as_str()) else {
            return Err(HandlerError::with_severity(
                format!("{} payload has no string id", event.name),
                Severity::Warning,
            ));
        };
        let key = user_cache_key(id);
        if ctx.cache.delete(&key).await {
            ctx.logger.debug(
                "cache entry invalidated",
                Some(&serde_json::json!({ "key": key })),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::cache::{Cache, MemoryCache};
    use crate::config::DatabaseConfig;
    use crate::db::Client;
    use crate::logging::{Logger, Redactor};
    use serde_json::json;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use std::sync::Arc;
    use std::time::Duration;

    fn context(cache: Arc<MemoryCache>) -> HandlerContext {
        let config = DatabaseConfig {
            connect_timeout: Duration::from_millis(200),
            ..DatabaseConfig::default()
        };
        let pool = PgPoolOptions::new()
            .acquire_timeout(config.connect_timeout)
            .connect_lazy_with(PgConnectOptions::new().host("127.0.0.1").port(1));
        let logger = Logger::new(Redactor::new(["password"])).with_trace_id("t");
        HandlerContext {
            client: Client::from_pool(pool, config, logger.clone()),
            cache,
            logger,
        }
    }

    #[test]
    fn cache_key_format() {
        assert_eq!(user_cache_key("abc"), "user:abc");
    }

    #[tokio::test]
    async fn invalidation_deletes_key() {
        let cache = Arc::new(MemoryCache::new());
        cache.set("user:42", "{}".to_string(), None).await;
        let ctx = context(Arc::clone(&cache));

        let event = Event::new("user.updated", json!({"id": "42"}));
        assert!(CacheInvalidationHandler.handle(&ctx, &event).await.is_ok());
        assert!(cache.get("user:42").await.is_none());
    }

    #[tokio::test]
    async fn invalidation_without_id_is_a_warning() {
        let ctx = context(Arc::new(MemoryCache::new()));
        let event = Event::new("user.updated", json!({}));
        let Err(err) = CacheInvalidationHandler.handle(&ctx, &event).await else {
            panic!("missing id must fail");
        };
        assert_eq!(err.severity(), Severity::Warning);
    }

    #[tokio::test]
    async fn audit_reports_storage_failure() {
        let ctx = context(Arc::new(MemoryCache::new()));
        let event = Event::new("user.registered", json!({"id": "1", "password": "x"})).with_defaults();
        let result = AuditTrailHandler.handle(&ctx, &event).await;
        assert!(result.is_err());

        let Some(log) = ctx.client.last_query() else {
            panic!("query must be recorded");
        };
        assert_eq!(log.trace_id, "t");
        assert!(log.args.contains(&crate::db::SqlArg::Json(
            json!({"id": "1", "password": "[Redacted]"})
        )));
    }
}
