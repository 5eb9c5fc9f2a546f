//! Hit/miss accounting decorator for any [`Cache`]

use super::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a value
    pub hits: u64,
    /// Lookups that returned nothing
    pub misses: u64,
}

impl CacheStats {
    /// Total lookups
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups that hit, 0.0 when there were none
    pub fn hit_ratio(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

/// Wraps a cache and counts hits and misses
///
/// Counting is for observability only; it never changes what the inner
/// cache returns.
#[derive(Debug)]
pub struct StatsCache<C> {
    inner: C,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<C> StatsCache<C> {
    /// Wrap `inner`
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped cache
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Shorthand for `stats().hit_ratio()`
    pub fn hit_ratio(&self) -> f64 {
        self.stats().hit_ratio()
    }

    /// Zero both counters
    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

impl<V, C> Cache<V> for StatsCache<C>
where
    C: Cache<V>,
{
    fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.inner.set(key, value, ttl);
    }

    fn get(&self, key: &str) -> Option<V> {
        let value = self.inner.get(key);
        let counter = if value.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    fn delete(&self, key: &str) {
        self.inner.delete(key);
    }

    fn clear(&self) {
        self.inner.clear();
    }

    fn size(&self) -> usize {
        self.inner.size()
    }
}
