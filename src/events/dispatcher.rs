//! Name-keyed handler registry with concurrent fan-out.
//!
//! [`EventDispatcher`] maps an event name to an ordered list of handler
//! instances. A dispatch spawns one task per registered handler, waits for
//! all of them, and reports failures. There is no cancellation: once
//! launched, a handler runs to completion.
//!
//! The registry is behind a [`tokio::sync::RwLock`]; registration and
//! dispatch may run concurrently. A dispatch works on a snapshot of the
//! handler list taken when it starts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinSet;

use super::error::{HandlerError, RegistryError};
use super::event::Event;

/// Reacts to dispatched events.
///
/// `C` is the per-dispatch context handed to every handler (for the event
/// manager, a trace-scoped storage client plus collaborators).
#[async_trait]
pub trait EventHandler<C>: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] when the side effect could not be applied.
    async fn handle(&self, ctx: &C, event: &Event) -> Result<(), HandlerError>;
}

type Handlers<C> = HashMap<String, Vec<Arc<dyn EventHandler<C>>>>;

/// Event-name to handler-list registry.
pub struct EventDispatcher<C> {
    handlers: RwLock<Handlers<C>>,
}

impl<C> fmt::Debug for EventDispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("EventDispatcher");
        match self.handlers.try_read() {
            Ok(map) => {
                let counts: HashMap<&str, usize> =
                    map.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
                dbg.field("handlers", &counts);
            }
            Err(_) => {
                dbg.field("handlers", &"<locked>");
            }
        }
        dbg.finish()
    }
}

impl<C> Default for EventDispatcher<C> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }
}

fn same_instance<C>(a: &Arc<dyn EventHandler<C>>, b: &Arc<dyn EventHandler<C>>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl<C: Send + Sync + 'static> EventDispatcher<C> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the list for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateHandler`] if this exact instance is
    /// already registered for `name`; the registry is left unchanged.
    pub async fn register(
        &self,
        name: &str,
        handler: Arc<dyn EventHandler<C>>,
    ) -> Result<(), RegistryError> {
        let mut map = self.handlers.write().await;
        let list = map.entry(name.to_string()).or_default();
        if list.iter().any(|h| same_instance(h, &handler)) {
            return Err(RegistryError::DuplicateHandler(name.to_string()));
        }
        tracing::debug!(event = name, handler = handler.name(), "handler registered");
        list.push(handler);
        Ok(())
    }

    /// Removes one registration of `handler` under `name`.
    ///
    /// Returns whether anything was removed; removing an unknown handler is
    /// a no-op.
    pub async fn remove(&self, name: &str, handler: &Arc<dyn EventHandler<C>>) -> bool {
        let mut map = self.handlers.write().await;
        let Some(list) = map.get_mut(name) else {
            return false;
        };
        let Some(pos) = list.iter().position(|h| same_instance(h, handler)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            map.remove(name);
        }
        true
    }

    /// Whether this exact handler instance is registered under `name`.
    pub async fn has(&self, name: &str, handler: &Arc<dyn EventHandler<C>>) -> bool {
        self.handlers
            .read()
            .await
            .get(name)
            .is_some_and(|list| list.iter().any(|h| same_instance(h, handler)))
    }

    /// Number of handlers registered under `name`.
    pub async fn count(&self, name: &str) -> usize {
        self.handlers.read().await.get(name).map_or(0, Vec::len)
    }

    /// Empties the whole registry.
    pub async fn clear(&self) {
        self.handlers.write().await.clear();
    }

    /// Runs every handler registered for `event.name` concurrently and
    /// waits for all of them.
    ///
    /// Only the first failure to complete is returned; later failures are
    /// dropped. Use [`EventDispatcher::dispatch_all`] to see every failure.
    /// An event with no handlers is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first [`HandlerError`] observed.
    pub async fn dispatch(&self, event: Event, ctx: C) -> Result<(), HandlerError> {
        match self.dispatch_all(event, ctx).await.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }

    /// Like [`EventDispatcher::dispatch`] but returns every failure, in
    /// completion order.
    pub async fn dispatch_all(&self, event: Event, ctx: C) -> Vec<HandlerError> {
        let event = Arc::new(event.with_defaults());
        let handlers = self
            .handlers
            .read()
            .await
            .get(&event.name)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            tracing::trace!(event = %event.name, "no handlers registered");
            return Vec::new();
        }

        let ctx = Arc::new(ctx);
        let mut tasks = JoinSet::new();
        for handler in handlers {
            let event = Arc::clone(&event);
            let ctx = Arc::clone(&ctx);
            tasks.spawn(async move { handler.handle(&ctx, &event).await });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failures.push(err),
                Err(join_err) => failures.push(HandlerError::Panicked(join_err.to_string())),
            }
        }
        failures
    }
}
