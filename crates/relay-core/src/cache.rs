//! TTL cache with explicit invalidation.
//!
//! Read-mostly cache for subscription and endpoint lookups. Entries expire
//! after a configurable TTL measured through the injected clock, and writers
//! invalidate explicitly in the same code path that persists their change.
//! A stale read within the TTL window is acceptable by design contract.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Duration, Utc};

use crate::time::Clock;

/// Key-value cache whose entries expire `ttl` after insertion.
///
/// Safe for concurrent use; all access goes through an internal lock held
/// only for the map operation itself.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache with the given time-to-live.
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl, clock }
    }

    /// Returns the cached value for a key if present and not expired.
    ///
    /// Expired entries are removed on access.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        match entries.get(key) {
            Some(entry) if now - entry.inserted_at < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            },
            None => None,
        }
    }

    /// Inserts or replaces a value, restarting its TTL.
    pub fn insert(&self, key: K, value: V) {
        let entry = CacheEntry { value, inserted_at: self.clock.now() };
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, entry);
    }

    /// Removes one key. Called by the code path that writes the backing
    /// entity, inside the same transaction boundary.
    pub fn invalidate(&self, key: &K) {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(key);
    }

    /// Removes every entry.
    pub fn invalidate_all(&self) {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
