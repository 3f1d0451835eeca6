//! In-process TTL cache for expensive existence lookups.
//!
//! Entries older than the caller's TTL read as misses. When the map reaches
//! `max_entries`, inserting sweeps out expired entries first; live entries are
//! never evicted, so the bound is soft.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::Error;

/// Cached value with its insertion time.
struct CachedEntry<V> {
    data: V,
    stored_at: Instant,
}

impl<V> CachedEntry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() > ttl
    }
}

/// Shared TTL cache keyed by derived lookup keys.
///
/// Uses a HashMap behind a tokio RwLock so concurrent readers never block
/// each other and writers are safe on a multi-threaded runtime.
pub struct LookupCache<V> {
    entries: Arc<RwLock<HashMap<String, CachedEntry<V>>>>,
    max_entries: usize,
    /// TTL used by the capacity sweep on insert.
    default_ttl: Duration,
}

impl<V: Clone> LookupCache<V> {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self { entries: Arc::new(RwLock::new(HashMap::new())), max_entries, default_ttl }
    }

    /// Return the cached value if present and younger than `ttl`.
    pub async fn get(&self, key: &str, ttl: Duration) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(ttl))
            .map(|entry| entry.data.clone())
    }

    /// Store a value, sweeping expired entries first when at capacity.
    pub async fn insert(&self, key: impl Into<String>, data: V) {
        let key = key.into();
        let mut entries = self.entries.write().await;

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let ttl = self.default_ttl;
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(ttl));
            tracing::debug!(evicted = before - entries.len(), remaining = entries.len(), "lookup cache sweep");
        }

        entries.insert(key, CachedEntry { data, stored_at: Instant::now() });
    }

    /// Return the cached value or compute, store and return a fresh one.
    ///
    /// Errors from `compute` are returned as-is and nothing is cached.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<V, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, Error>>,
    {
        if let Some(hit) = self.get(key, ttl).await {
            tracing::debug!(key, "lookup cache hit");
            return Ok(hit);
        }

        let data = compute().await?;
        self.insert(key, data.clone()).await;
        Ok(data)
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cached_entry_expiry() {
        let ttl = Duration::from_secs(60);
        let mut entry = CachedEntry { data: 1, stored_at: Instant::now() };
        assert!(!entry.is_expired(ttl));

        entry.stored_at = Instant::now() - ttl - Duration::from_secs(1);
        assert!(entry.is_expired(ttl));
    }

    #[tokio::test]
    async fn test_hit_before_ttl_recompute_after() {
        let cache = LookupCache::new(8, Duration::from_millis(50));
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let ttl = Duration::from_millis(50);

        let compute = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(42)
        };

        assert_eq!(cache.get_or_compute("k", ttl, compute).await.unwrap(), 42);
        assert_eq!(cache.get_or_compute("k", ttl, compute).await.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(cache.get_or_compute("k", ttl, compute).await.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_compute_error_not_cached() {
        let cache: LookupCache<u32> = LookupCache::new(8, Duration::from_secs(60));
        let result = cache
            .get_or_compute("k", Duration::from_secs(60), || async {
                Err(Error::InvalidInput("boom".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_capacity_sweep_evicts_only_expired() {
        let cache = LookupCache::new(2, Duration::from_millis(30));
        cache.insert("old", 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.insert("fresh", 2).await;

        cache.insert("third", 3).await;
        assert_eq!(cache.len().await, 2);
        assert!(cache.get("old", Duration::from_secs(60)).await.is_none());

        // Nothing expired: the bound is soft and the insert still lands.
        cache.insert("fourth", 4).await;
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = LookupCache::new(4, Duration::from_secs(60));
        cache.insert("k", "v".to_string()).await;
        cache.invalidate("k").await;
        assert!(cache.get("k", Duration::from_secs(60)).await.is_none());
    }
}
