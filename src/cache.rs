//! Key-value cache collaborator.
//!
//! The service only relies on get/set/delete with a TTL. [`MemoryCache`] is
//! the in-process implementation; a networked store slots in behind the
//! same [`Cache`] trait.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Plain get/set/delete-with-TTL contract.
#[async_trait]
pub trait Cache: Send + Sync + fmt::Debug {
    /// Returns the live value stored under `key`.
    async fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`. `None` means no expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>);

    /// Removes `key`, returning whether a live entry was present.
    async fn delete(&self, key: &str) -> bool;
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process cache with lazy expiry: stale entries are dropped when read.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including ones that expired but were not
    /// yet read.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let map = self.entries.read().await;
            match map.get(key) {
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut map = self.entries.write().await;
        if map.get(key).is_some_and(|e| !e.is_live(now)) {
            map.remove(key);
        }
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
    }

    async fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .write()
            .await
            .remove(key)
            .is_some_and(|e| e.is_live(now))
    }
}
