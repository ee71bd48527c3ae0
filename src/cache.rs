//! Generic in-process cache with per-entry expiration.
//!
//! # Semantics
//!
//! - Expiry is lazy: an expired entry is removed by the `get` that observes it,
//!   or by [`ExpiringCache::purge_expired`] when a sweeper is running.
//! - A TTL of [`Duration::ZERO`] means the entry never expires.
//! - [`ExpiringCache::size`] counts expired entries that have not been purged
//!   yet, so it is an upper bound on the number of live entries.
//!
//! # Concurrency
//!
//! Lookups share a read lock. Writers (`set`, `delete`, `clear`, eviction)
//! take the write lock only for the single map mutation they perform.
//!
//! ```text
//! get(k) ──read──► live?  ──yes──► clone value
//!                    │
//!                    no (expired)
//!                    ▼
//!          drop read, take write, re-check expiry, remove k
//! ```

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::lock::{rw_read, rw_write};

/// A stored value and the instant it stops being served.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    /// `None` for entries stored with a zero TTL.
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Thread-safe map from string keys to values with per-entry expiration.
///
/// Values are returned by clone, so large payloads should be stored behind a
/// cheaply clonable handle such as [`bytes::Bytes`] or `Arc<T>`.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use edge_layer::ExpiringCache;
///
/// let cache = ExpiringCache::new();
/// cache.set("greeting", "hello".to_string(), Duration::from_secs(60));
/// assert_eq!(cache.get("greeting").as_deref(), Some("hello"));
///
/// // Zero TTL: kept until deleted or cleared
/// cache.set("pinned", "forever".to_string(), Duration::ZERO);
/// ```
#[derive(Debug)]
pub struct ExpiringCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
}

impl<V> Default for ExpiringCache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> ExpiringCache<V> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the value stored under `key` if it has not expired.
    ///
    /// An expired entry is removed as a side effect.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();

        {
            let entries = rw_read(&self.entries, "cache.get");
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Another writer may have replaced the entry between the two locks.
        let mut entries = rw_write(&self.entries, "cache.get.evict");
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            trace!(key, "Evicted expired cache entry");
        }

        None
    }

    /// Insert or overwrite `key`, expiring `ttl` from now.
    ///
    /// A zero `ttl` stores the entry without an expiry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };

        rw_write(&self.entries, "cache.set").insert(key.into(), CacheEntry { value, expires_at });
    }

    /// Remove `key`. Absent keys are ignored.
    pub fn delete(&self, key: &str) {
        rw_write(&self.entries, "cache.delete").remove(key);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        *rw_write(&self.entries, "cache.clear") = HashMap::new();
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn size(&self) -> usize {
        rw_read(&self.entries, "cache.size").len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, "cache.purge_expired");
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_new_cache_is_empty() {
        let cache: ExpiringCache<String> = ExpiringCache::new();
        assert_eq!(cache.size(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_then_get() {
        let cache = ExpiringCache::new();
        cache.set("key1", "value1".to_string(), Duration::from_secs(3600));

        assert_eq!(cache.get("key1"), Some("value1".to_string()));
        assert_eq!(cache.get("bogus"), None);
    }

    #[test]
    fn test_set_overwrites_existing_key() {
        let cache = ExpiringCache::new();
        cache.set("key1", 1, Duration::from_secs(60));
        cache.set("key1", 2, Duration::from_secs(60));

        assert_eq!(cache.get("key1"), Some(2));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_expired_entry_is_evicted_on_get() {
        let cache = ExpiringCache::new();
        cache.set("key1", "value1".to_string(), Duration::from_millis(100));
        assert_eq!(cache.get("key1"), Some("value1".to_string()));

        thread::sleep(Duration::from_millis(150));

        assert_eq!(cache.get("key1"), None);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_expired_entry_counts_until_accessed() {
        let cache = ExpiringCache::new();
        cache.set("key1", 1, Duration::from_millis(20));
        thread::sleep(Duration::from_millis(40));

        // Size is approximate until the entry is observed
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.get("key1"), None);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let cache = ExpiringCache::new();
        cache.set("template", "compiled".to_string(), Duration::ZERO);

        thread::sleep(Duration::from_millis(50));

        assert_eq!(cache.get("template"), Some("compiled".to_string()));
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(cache.get("template"), Some("compiled".to_string()));
    }

    #[test]
    fn test_clear_removes_everything() {
        let cache = ExpiringCache::new();
        cache.set("key1", "value1".to_string(), Duration::from_secs(3600));
        cache.set("key2", "value2".to_string(), Duration::ZERO);

        cache.clear();

        assert_eq!(cache.size(), 0);
        assert_eq!(cache.get("key1"), None);
        assert_eq!(cache.get("key2"), None);
    }

    #[test]
    fn test_delete_existing_and_absent_keys() {
        let cache = ExpiringCache::new();
        cache.set("key1", "value1".to_string(), Duration::from_secs(3600));

        cache.delete("key1");
        assert_eq!(cache.get("key1"), None);

        // Deleting an absent key is a no-op
        cache.delete("bogus");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired_keeps_live_entries() {
        let cache = ExpiringCache::new();
        cache.set("short", 1, Duration::from_millis(10));
        cache.set("long", 2, Duration::from_secs(3600));
        cache.set("pinned", 3, Duration::ZERO);

        thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get("long"), Some(2));
        assert_eq!(cache.get("pinned"), Some(3));
    }

    #[test]
    fn test_refreshed_entry_survives_stale_eviction() {
        let cache = ExpiringCache::new();
        cache.set("key", 1, Duration::from_millis(10));
        thread::sleep(Duration::from_millis(20));

        // A fresh write replaces the expired entry before anyone observes it
        cache.set("key", 2, Duration::from_secs(60));
        assert_eq!(cache.get("key"), Some(2));
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let cache = Arc::new(ExpiringCache::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("key-{}", i % 20);
                        cache.set(key.clone(), worker, Duration::from_secs(60));
                        assert!(cache.get(&key).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.size(), 20);
    }
}
