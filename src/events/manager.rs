//! Binds the dispatcher to storage, cache and alerting.

use std::sync::Arc;

use serde_json::json;

use super::dispatcher::{EventDispatcher, EventHandler};
use super::error::{HandlerError, RegistryError};
use super::event::{Event, names};
use super::handlers::{AuditTrailHandler, CacheInvalidationHandler};
use crate::alert::{Alert, AlertField, AlertSink, Severity};
use crate::cache::Cache;
use crate::db::Client;
use crate::logging::Logger;

/// Everything a handler may touch during one dispatch.
///
/// The client and logger are scoped to the event's trace id, so queries a
/// handler issues are attributable to the operation that raised the event.
#[derive(Debug)]
pub struct HandlerContext {
    /// Pool-bound client tagged with the event's trace id.
    pub client: Client,
    /// Shared cache.
    pub cache: Arc<dyn Cache>,
    /// Logger tagged with the event's trace id.
    pub logger: Logger,
}

/// Handler type registered with the [`EventManager`].
pub type ManagedHandler = Arc<dyn EventHandler<HandlerContext>>;

/// Dispatches events with a trace-scoped context and turns handler
/// failures into log entries and alerts.
///
/// Side effects are best-effort and not transactional with the request
/// that triggered them: [`EventManager::dispatch`] never returns an error.
#[derive(Debug)]
pub struct EventManager {
    dispatcher: Arc<EventDispatcher<HandlerContext>>,
    client: Client,
    cache: Arc<dyn Cache>,
    alerts: Arc<dyn AlertSink>,
    min_alert_severity: Severity,
}

impl EventManager {
    /// Creates a manager and registers the built-in handlers.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if a built-in registration is rejected.
    pub async fn new(
        client: Client,
        cache: Arc<dyn Cache>,
        alerts: Arc<dyn AlertSink>,
        min_alert_severity: Severity,
    ) -> Result<Self, RegistryError> {
        let manager = Self {
            dispatcher: Arc::new(EventDispatcher::new()),
            client,
            cache,
            alerts,
            min_alert_severity,
        };
        manager.register_builtins().await?;
        Ok(manager)
    }

    async fn register_builtins(&self) -> Result<(), RegistryError> {
        let audit: ManagedHandler = Arc::new(AuditTrailHandler);
        let invalidate: ManagedHandler = Arc::new(CacheInvalidationHandler);

        for name in [
            names::USER_REGISTERED,
            names::USER_UPDATED,
            names::USER_DELETED,
        ] {
            self.dispatcher.register(name, Arc::clone(&audit)).await?;
        }
        for name in [names::USER_UPDATED, names::USER_DELETED] {
            self.dispatcher
                .register(name, Arc::clone(&invalidate))
                .await?;
        }
        Ok(())
    }

    /// The underlying registry.
    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher<HandlerContext> {
        &self.dispatcher
    }

    /// Registers an additional handler.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateHandler`] if `handler` is already
    /// registered for `name`.
    pub async fn register(&self, name: &str, handler: ManagedHandler) -> Result<(), RegistryError> {
        self.dispatcher.register(name, handler).await
    }

    /// Dispatches `event`, inheriting `origin`'s trace id when the event has
    /// none. Typically called from an after-commit hook with the hook's
    /// client.
    pub async fn dispatch_from(&self, origin: &Client, event: Event) -> usize {
        let event = if event.trace_id.is_none() {
            event.with_trace_id(origin.trace_id())
        } else {
            event
        };
        self.dispatch(event).await
    }

    /// Dispatches `event` to every handler registered for its name and
    /// waits for them.
    ///
    /// Each failure is logged with the event name and trace id, and alerted
    /// in the background when at or above the configured severity. Returns
    /// the number of failed handlers.
    pub async fn dispatch(&self, event: Event) -> usize {
        let event = event.with_defaults();
        let trace_id = event.trace_id().to_string();
        let name = event.name.clone();

        let logger = self.client.logger().with_trace_id(trace_id.as_str());
        let ctx = HandlerContext {
            client: self.client.with_logger(logger.clone()),
            cache: Arc::clone(&self.cache),
            logger: logger.clone(),
        };

        let failures = self.dispatcher.dispatch_all(event, ctx).await;
        for failure in &failures {
            self.report(&logger, &name, &trace_id, failure);
        }
        failures.len()
    }

    fn report(&self, logger: &Logger, event: &str, trace_id: &str, failure: &HandlerError) {
        let severity = failure.severity();
        logger.error(
            "event handler failed",
            Some(&json!({
                "event": event,
                "trace_id": trace_id,
                "error": failure.to_string(),
                "severity": severity,
            })),
        );
        if severity < self.min_alert_severity {
            return;
        }

        let alert = Alert {
            severity,
            fields: vec![
                AlertField::new("message", "event handler failed"),
                AlertField::new("event", event),
                AlertField::new("trace_id", trace_id),
                AlertField::new("error", failure.to_string()),
            ],
        };
        let sink = Arc::clone(&self.alerts);
        let logger = logger.clone();
        drop(tokio::spawn(async move {
            if let Err(err) = sink.send(&alert).await {
                logger.warn(
                    "alert delivery failed",
                    Some(&json!({ "error": err.to_string() })),
                );
            }
        }));
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::alert::AlertError;
    use crate::cache::MemoryCache;
    use crate::config::DatabaseConfig;
    use crate::events::handlers::user_cache_key;
    use crate::logging::Redactor;
    use async_trait::async_trait;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug)]
    struct ChannelSink(mpsc::UnboundedSender<Alert>);

    #[async_trait]
    impl AlertSink for ChannelSink {
        async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
            let _ = self.0.send(alert.clone());
            Ok(())
        }
    }

    struct TraceProbe(mpsc::UnboundedSender<(String, String)>);

    #[async_trait]
    impl EventHandler<HandlerContext> for TraceProbe {
        fn name(&self) -> &str {
            "trace-probe"
        }

        async fn handle(&self, ctx: &HandlerContext, event: &Event) -> Result<(), HandlerError> {
            let _ = self
                .0
                .send((ctx.client.trace_id().to_string(), event.trace_id().to_string()));
            Ok(())
        }
    }

    struct Failing(Severity);

    #[async_trait]
    impl EventHandler<HandlerContext> for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle(&self, _ctx: &HandlerContext, _event: &Event) -> Result<(), HandlerError> {
            Err(HandlerError::with_severity("side effect lost", self.0))
        }
    }

    fn offline_client() -> Client {
        let config = DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout: Duration::from_millis(200),
            query_timeout: Duration::from_secs(2),
            ..DatabaseConfig::default()
        };
        let pool = PgPoolOptions::new()
            .acquire_timeout(config.connect_timeout)
            .connect_lazy_with(PgConnectOptions::new().host("127.0.0.1").port(1));
        Client::from_pool(pool, config, Logger::new(Redactor::default()))
    }

    async fn manager(min: Severity) -> (EventManager, Arc<MemoryCache>, mpsc::UnboundedReceiver<Alert>) {
        let cache = Arc::new(MemoryCache::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let Ok(manager) = EventManager::new(
            offline_client(),
            Arc::clone(&cache) as Arc<dyn Cache>,
            Arc::new(ChannelSink(tx)),
            min,
        )
        .await
        else {
            panic!("builtins must register");
        };
        (manager, cache, rx)
    }

    #[tokio::test]
    async fn builtins_are_registered() {
        let (manager, _, _) = manager(Severity::Error).await;
        let d = manager.dispatcher();
        assert_eq!(d.count(names::USER_REGISTERED).await, 1);
        assert_eq!(d.count(names::USER_UPDATED).await, 2);
        assert_eq!(d.count(names::USER_DELETED).await, 2);
    }

    #[tokio::test]
    async fn handlers_get_a_trace_scoped_client() {
        let (manager, _, _) = manager(Severity::Error).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _ = manager.register("probe", Arc::new(TraceProbe(tx))).await;

        let origin = offline_client().with_trace_id("req-42");
        let failures = manager
            .dispatch_from(&origin, Event::new("probe", json!({})))
            .await;
        assert_eq!(failures, 0);

        let Some((client_trace, event_trace)) = rx.recv().await else {
            panic!("probe must run");
        };
        assert_eq!(client_trace, "req-42");
        assert_eq!(event_trace, "req-42");
    }

    #[tokio::test]
    async fn failures_are_alerted_not_raised() {
        let (manager, _, mut alerts) = manager(Severity::Error).await;
        let _ = manager
            .register("e", Arc::new(Failing(Severity::Critical)))
            .await;

        let failed = manager
            .dispatch(Event::new("e", json!({})).with_trace_id("t-9"))
            .await;
        assert_eq!(failed, 1);

        let received = tokio::time::timeout(Duration::from_secs(2), alerts.recv()).await;
        let Ok(Some(alert)) = received else {
            panic!("alert must be delivered");
        };
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.fields.contains(&AlertField::new("trace_id", "t-9")));
        assert!(alert.fields.contains(&AlertField::new("event", "e")));
    }

    #[tokio::test]
    async fn low_severity_failures_are_only_logged() {
        let (manager, _, mut alerts) = manager(Severity::Error).await;
        let _ = manager
            .register("e", Arc::new(Failing(Severity::Warning)))
            .await;

        assert_eq!(manager.dispatch(Event::new("e", json!({}))).await, 1);
        let received = tokio::time::timeout(Duration::from_millis(200), alerts.recv()).await;
        assert!(received.is_err(), "warning must not be alerted");
    }

    #[tokio::test]
    async fn user_update_invalidates_cache_even_if_audit_fails() {
        let (manager, cache, _) = manager(Severity::Critical).await;
        let id = uuid::Uuid::new_v4();
        cache
            .set(&user_cache_key(&id.to_string()), "{}".to_string(), None)
            .await;

        let failed = manager
            .dispatch(Event::new(names::USER_UPDATED, json!({ "id": id })))
            .await;
        // The audit insert cannot reach the database.
        assert_eq!(failed, 1);
        assert!(cache.get(&user_cache_key(&id.to_string())).await.is_none());
    }
}
