//! Bounded least-recently-used cache of successful fetch results.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cached::{Cached, SizedCache};
use tokio::time::Instant;

use crate::RequestKey;

/// A cached result together with the time it was stored.
///
/// Entries are never mutated; a fresh fetch replaces the entry wholesale.
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    inserted_at: Instant,
}

/// Least-recently-used map from [`RequestKey`] to the last successful result.
///
/// Capacity is fixed at construction. Recency is refreshed on every hit, so
/// the entry evicted on overflow is the one that was *accessed* longest ago,
/// not the one inserted first. Entries older than the optional maximum age
/// behave like misses and are dropped on lookup.
///
/// All operations take a single mutex. Request volume in an interactive
/// application is tens of entries, not millions, so the lock is uncontended
/// in practice.
///
/// Errors are never stored, which keeps a transient failure from poisoning
/// later requests for the same key.
#[derive(Debug)]
pub struct ResultCache<T> {
    /// `None` if caching is disabled (capacity 0)
    store: Option<Mutex<SizedCache<RequestKey, CacheEntry<T>>>>,
    capacity: usize,
    max_age: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> ResultCache<T> {
    /// Create a cache holding at most `capacity` entries.
    /// A capacity of 0 disables caching.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_max_age(capacity, None)
    }

    /// Create a cache whose entries additionally expire after `max_age`
    #[must_use]
    pub fn with_max_age(capacity: usize, max_age: Option<Duration>) -> Self {
        Self {
            store: (capacity > 0).then(|| Mutex::new(SizedCache::with_size(capacity))),
            capacity,
            max_age,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `key`, refreshing its recency on a hit
    pub fn get(&self, key: &RequestKey) -> Option<T> {
        let value = self.store.as_ref().and_then(|store| {
            let mut store = lock(store);
            let (value, expired) = match store.cache_get(key) {
                Some(entry) if self.is_expired(entry) => (None, true),
                Some(entry) => (Some(entry.value.clone()), false),
                None => (None, false),
            };
            if expired {
                log::debug!("Cache entry for {key} expired");
                store.cache_remove(key);
            }
            value
        });

        let counter = if value.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Store a successful result, evicting the least recently used entry if
    /// the cache is full
    pub fn put(&self, key: RequestKey, value: T) {
        if let Some(store) = &self.store {
            let entry = CacheEntry {
                value,
                inserted_at: Instant::now(),
            };
            lock(store).cache_set(key, entry);
        }
    }

    /// Remove `key`, returning whether it was cached
    pub fn remove(&self, key: &RequestKey) -> bool {
        self.store
            .as_ref()
            .is_some_and(|store| lock(store).cache_remove(key).is_some())
    }

    /// Remove all entries
    pub fn clear(&self) {
        if let Some(store) = &self.store {
            lock(store).cache_clear();
        }
    }

    /// Number of entries currently stored (expired entries included until
    /// they are looked up)
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.as_ref().map_or(0, |store| lock(store).cache_size())
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of lookups answered from the cache
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of lookups that missed
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fraction of lookups answered from the cache, between 0.0 and 1.0
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = hits as f64 / total as f64;
        rate
    }

    fn is_expired(&self, entry: &CacheEntry<T>) -> bool {
        self.max_age
            .is_some_and(|max_age| entry.inserted_at.elapsed() >= max_age)
    }
}

fn lock<S>(store: &Mutex<S>) -> MutexGuard<'_, S> {
    // A panic while holding the lock cannot leave the LRU half-updated in a
    // way that matters to us; keep serving from it.
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;

    fn key(s: &str) -> RequestKey {
        RequestKey::from(s)
    }

    #[test]
    fn test_get_after_put() {
        let cache = ResultCache::new(4);
        assert_eq!(cache.get(&key("a")), None);

        cache.put(key("a"), 1);
        assert_eq!(cache.get(&key("a")), Some(1));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_evicts_least_recently_inserted_without_access() {
        // capacity 2; fetch A, B, C in order -> {B, C}
        let cache = ResultCache::new(2);
        cache.put(key("A"), "a");
        cache.put(key("B"), "b");
        cache.put(key("C"), "c");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("A")), None);
        assert_eq!(cache.get(&key("B")), Some("b"));
        assert_eq!(cache.get(&key("C")), Some("c"));
    }

    #[test]
    fn test_access_refreshes_recency() {
        let cache = ResultCache::new(2);
        cache.put(key("A"), "a");
        cache.put(key("B"), "b");

        // A is now more recent than B
        assert_eq!(cache.get(&key("A")), Some("a"));
        cache.put(key("C"), "c");

        assert_eq!(cache.get(&key("B")), None);
        assert_eq!(cache.get(&key("A")), Some("a"));
        assert_eq!(cache.get(&key("C")), Some("c"));
    }

    #[test]
    fn test_put_replaces_entry() {
        let cache = ResultCache::new(2);
        cache.put(key("A"), 1);
        cache.put(key("A"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("A")), Some(2));
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = ResultCache::new(0);
        cache.put(key("A"), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&key("A")), None);
        assert!(!cache.remove(&key("A")));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = ResultCache::new(3);
        cache.put(key("A"), 1);
        cache.put(key("B"), 2);

        assert!(cache.remove(&key("A")));
        assert!(!cache.remove(&key("A")));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_max_age() {
        let cache = ResultCache::with_max_age(4, Some(Duration::from_secs(300)));
        cache.put(key("A"), 1);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get(&key("A")), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&key("A")), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hit_rate() {
        let cache = ResultCache::new(1);
        assert!((cache.hit_rate() - 0.0).abs() < f64::EPSILON);

        cache.put(key("A"), ());
        let _ = cache.get(&key("A"));
        let _ = cache.get(&key("B"));
        assert!((cache.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(ResultCache::new(16));
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let k = key(&format!("{}", (t * 100 + i) % 32));
                        cache.put(k.clone(), i);
                        let _ = cache.get(&k);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(cache.len(), 16);
    }
}
