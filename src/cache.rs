//! Response caching with TTL for upstream product API results
//!
//! Provides a thread-safe, TTL-based cache keyed by a request fingerprint.
//! Keys are built with [`create_key`] from an operation namespace and its
//! ordered parameters, e.g. `search:shoes:10`.
//!
//! Expiry is lazy: a read that finds a stale entry treats it as a miss and
//! removes it. [`ResponseCache::evict_expired`] can additionally be run as
//! background maintenance. Time is read through a [`Clock`] so expiry can be
//! tested deterministically.

use std::fmt::{self, Display, Write as _};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

/// Separator between key segments
const KEY_SEPARATOR: char = ':';

/// Source of the current instant
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Build a cache key from an operation namespace and ordered parameters
///
/// The key format is `{namespace}:{param1}:{param2}...`. Separator and
/// backslash characters inside parameters are escaped so distinct parameter
/// lists never produce the same key.
#[must_use]
pub fn create_key(namespace: &str, params: &[&dyn Display]) -> String {
    let mut key = String::with_capacity(namespace.len() + params.len() * 8);
    key.push_str(namespace);
    for param in params {
        key.push(KEY_SEPARATOR);
        push_escaped(&mut key, *param);
    }
    key
}

fn push_escaped(key: &mut String, param: &dyn Display) {
    struct Escaper<'a>(&'a mut String);

    impl fmt::Write for Escaper<'_> {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for c in s.chars() {
                if c == KEY_SEPARATOR || c == '\\' {
                    self.0.push('\\');
                }
                self.0.push(c);
            }
            Ok(())
        }
    }

    // Writing into a String cannot fail
    let _ = write!(Escaper(key), "{param}");
}

/// Thread-safe response cache with TTL expiry
pub struct ResponseCache {
    /// Cache entries keyed by request fingerprint
    entries: DashMap<String, CachedResponse>,
    /// Maximum number of entries (0 = unbounded)
    max_entries: usize,
    /// Time source
    clock: Arc<dyn Clock>,
    /// Cache statistics
    stats: CacheStats,
}

/// A cached response with its absolute expiry
struct CachedResponse {
    /// The cached JSON value
    value: Value,
    /// When this entry stops being served; `None` when the TTL runs past what
    /// `Instant` can represent
    expires_at: Option<Instant>,
}

impl CachedResponse {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Cache statistics tracked atomically
#[derive(Debug)]
pub struct CacheStats {
    /// Total cache hits (entries served from cache)
    pub hits: AtomicU64,
    /// Total cache misses (entries not found or expired)
    pub misses: AtomicU64,
    /// Total evictions (expired or displaced entries removed)
    pub evictions: AtomicU64,
}

impl CacheStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get current cache hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get current cache miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get current eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0-1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl ResponseCache {
    /// Create an unbounded cache on the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), 0)
    }

    /// Create a cache with an explicit clock and entry bound (0 = unbounded)
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            clock,
            stats: CacheStats::new(),
        }
    }

    /// Get a cached response if it exists and hasn't expired
    ///
    /// Returns `None` if the key doesn't exist or the entry has expired.
    /// Expired entries are evicted.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                // A concurrent set may have replaced the entry in between
                if self
                    .entries
                    .remove_if(key, |_, e| e.is_expired(now))
                    .is_some()
                {
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.record_miss();
                None
            } else {
                self.record_hit();
                Some(entry.value.clone())
            }
        } else {
            self.record_miss();
            None
        }
    }

    /// Store a value with the given TTL, replacing any previous entry
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let now = self.clock.now();
        if self.max_entries > 0
            && self.entries.len() >= self.max_entries
            && !self.entries.contains_key(key)
        {
            self.make_room(now);
        }

        let entry = CachedResponse {
            value,
            expires_at: now.checked_add(ttl),
        };
        self.entries.insert(key.to_string(), entry);
    }

    /// Return the cached value or compute, cache and return a fresh one
    ///
    /// Errors from `fetch` are returned unchanged and are never cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, ttl: Duration, fetch: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = fetch().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            evictions: self.stats.evictions(),
            size: self.entries.len(),
            hit_rate: self.stats.hit_rate(),
        }
    }

    /// Number of stored entries, including not yet evicted stale ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Evict expired entries (background maintenance)
    ///
    /// Returns the number of entries removed.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let count = before.saturating_sub(self.entries.len());

        if count > 0 {
            self.stats
                .evictions
                .fetch_add(count as u64, Ordering::Relaxed);
        }
        count
    }

    /// Free one slot: purge stale entries, else drop the soonest-expiring one
    fn make_room(&self, now: Instant) {
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
            keep
        });
        if self.entries.len() < self.max_entries {
            return;
        }

        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| {
                let expires_at = entry.value().expires_at;
                (expires_at.is_none(), expires_at)
            })
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_hit(&self) {
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        telemetry_metrics::counter!("pricewatch_cache_hits_total").increment(1);
    }

    fn record_miss(&self) {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        telemetry_metrics::counter!("pricewatch_cache_misses_total").increment(1);
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Total evictions
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manual_cache(max_entries: usize) -> (Arc<ManualClock>, ResponseCache) {
        let clock = Arc::new(ManualClock::new());
        let cache = ResponseCache::with_clock(clock.clone(), max_entries);
        (clock, cache)
    }

    #[test]
    fn test_cache_hit() {
        let cache = ResponseCache::new();
        let value = json!({"result": "success"});

        cache.set("test_key", value.clone(), Duration::from_secs(60));
        let retrieved = cache.get("test_key");

        assert_eq!(retrieved, Some(value));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_cache_miss() {
        let cache = ResponseCache::new();
        assert_eq!(cache.get("nonexistent"), None);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_zero_ttl_expires_after_any_delay() {
        let (clock, cache) = manual_cache(0);
        cache.set("k", json!(1), Duration::ZERO);
        clock.advance(Duration::from_millis(1));

        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_slot_usable_after_eviction() {
        let (clock, cache) = manual_cache(0);
        cache.set("k", json!("old"), Duration::from_secs(1));
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get("k"), None);

        cache.set("k", json!("new"), Duration::from_secs(1));
        assert_eq!(cache.get("k"), Some(json!("new")));
    }

    #[test]
    fn test_set_overwrites() {
        let cache = ResponseCache::new();
        cache.set("k", json!(1), Duration::from_secs(60));
        cache.set("k", json!(2), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(json!(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_create_key_format() {
        assert_eq!(create_key("search", &[&"shoes", &10]), "search:shoes:10");
        assert_eq!(create_key("best_products", &[&1001, &20]), "best_products:1001:20");
        assert_eq!(create_key("ping", &[]), "ping");
    }

    #[test]
    fn test_create_key_escapes_separator() {
        let a = create_key("ns", &[&"a:b", &"c"]);
        let b = create_key("ns", &[&"a", &"b:c"]);
        assert_ne!(a, b);
        assert_eq!(a, r"ns:a\:b:c");
        assert_ne!(create_key("ns", &[&r"a\", &"b"]), create_key("ns", &[&r"a\:b"]));
    }

    #[test]
    fn test_create_key_order_matters() {
        assert_ne!(create_key("ns", &[&1, &2]), create_key("ns", &[&2, &1]));
    }

    #[test]
    fn test_hit_rate() {
        let cache = ResponseCache::new();
        cache.set("key1", json!(1), Duration::from_secs(60));
        cache.set("key2", json!(2), Duration::from_secs(60));

        cache.get("key1");
        cache.get("key2");
        cache.get("key3");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_clear() {
        let cache = ResponseCache::new();
        cache.set("key1", json!(1), Duration::from_secs(60));
        cache.set("key2", json!(2), Duration::from_secs(60));
        assert_eq!(cache.stats().size, 2);

        cache.clear();
        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.get("key1"), None);
    }

    #[test]
    fn test_evict_expired() {
        let (clock, cache) = manual_cache(0);
        cache.set("short", json!(1), Duration::from_millis(1));
        cache.set("long", json!(2), Duration::from_secs(60));

        clock.advance(Duration::from_millis(5));

        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.stats().size, 1);
        assert_eq!(cache.get("long"), Some(json!(2)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_bound_prefers_expired_entries() {
        let (clock, cache) = manual_cache(2);
        cache.set("stale", json!(1), Duration::from_secs(1));
        cache.set("fresh", json!(2), Duration::from_secs(60));
        clock.advance(Duration::from_secs(2));

        cache.set("third", json!(3), Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("fresh"), Some(json!(2)));
        assert_eq!(cache.get("third"), Some(json!(3)));
    }

    #[test]
    fn test_bound_evicts_soonest_expiring() {
        let (_clock, cache) = manual_cache(2);
        cache.set("a", json!(1), Duration::from_secs(10));
        cache.set("b", json!(2), Duration::from_secs(60));
        cache.set("c", json!(3), Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(json!(2)));
    }

    #[test]
    fn test_bound_allows_overwrite_at_capacity() {
        let (_clock, cache) = manual_cache(1);
        cache.set("a", json!(1), Duration::from_secs(10));
        cache.set("a", json!(2), Duration::from_secs(10));
        assert_eq!(cache.get("a"), Some(json!(2)));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test]
    async fn test_get_or_fetch_caches_success_only() {
        let cache = ResponseCache::new();

        let failed: Result<Value, &str> = cache
            .get_or_fetch("k", Duration::from_secs(60), || async { Err("down") })
            .await;
        assert_eq!(failed, Err("down"));
        assert!(cache.is_empty());

        let fetched: Result<Value, &str> = cache
            .get_or_fetch("k", Duration::from_secs(60), || async { Ok(json!(7)) })
            .await;
        assert_eq!(fetched, Ok(json!(7)));

        let cached: Result<Value, &str> = cache
            .get_or_fetch("k", Duration::from_secs(60), || async {
                panic!("fetch must not run on a hit")
            })
            .await;
        assert_eq!(cached, Ok(json!(7)));
    }
}
