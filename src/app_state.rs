//! Shared application state injected into all Axum handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::db::Client;
use crate::events::EventManager;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
///
/// Every dependency is constructed once in `main` and injected here; there
/// are no process-wide singletons.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Root storage client. Requests derive their own copy from it.
    pub client: Arc<Client>,
    /// Event manager for post-commit side effects.
    pub events: Arc<EventManager>,
    /// Read-through cache for user lookups.
    pub cache: Arc<dyn Cache>,
    /// TTL applied to cached entries.
    pub cache_ttl: Duration,
}
