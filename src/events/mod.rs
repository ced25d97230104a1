//! Post-commit event notification.
//!
//! [`EventDispatcher`] is the name-keyed handler registry with concurrent
//! fan-out; [`EventManager`] binds it to the storage client, the cache and
//! the alert sink, and registers the built-in handlers.

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handlers;
pub mod manager;

pub use dispatcher::{EventDispatcher, EventHandler};
pub use error::{HandlerError, RegistryError};
pub use event::{Event, names};
pub use handlers::{AuditTrailHandler, CacheInvalidationHandler, user_cache_key};
pub use manager::{EventManager, HandlerContext, ManagedHandler};
