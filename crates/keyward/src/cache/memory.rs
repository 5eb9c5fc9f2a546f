//! Thread-safe TTL cache backed by `RwLock<HashMap>`

use super::{Cache, Cacheable};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Fraction of a value's remaining lifetime it may spend in the cache
const LIFETIME_FRACTION: f64 = 0.9;

/// Default TTL when neither the value nor the caller provides one
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Default period of the background sweep
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V: Cacheable> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at && !self.value.is_expired()
    }
}

type Entries<V> = RwLock<HashMap<String, CacheEntry<V>>>;

/// In-memory cache with lazy eviction on read and an optional background sweep
///
/// # Example
///
/// ```rust
/// use keyward::cache::{Cache, MemoryCache};
/// use std::time::Duration;
///
/// let cache: MemoryCache<String> = MemoryCache::new(Duration::from_secs(60));
/// cache.set("greeting", "hello".to_string(), None);
/// assert_eq!(cache.get("greeting").as_deref(), Some("hello"));
/// ```
pub struct MemoryCache<V> {
    entries: Arc<Entries<V>>,
    default_ttl: Duration,
    sweeper: Option<JoinHandle<()>>,
}

impl<V> std::fmt::Debug for MemoryCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.read().len())
            .field("default_ttl", &self.default_ttl)
            .field("sweeper", &self.sweeper.is_some())
            .finish()
    }
}

impl<V: Cacheable> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<V: Cacheable> MemoryCache<V> {
    /// Create a cache without a background sweep (eviction happens on access)
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
            sweeper: None,
        }
    }

    /// Create a cache that also purges expired entries every `interval`
    ///
    /// The sweep runs on the current tokio runtime and stops when the cache
    /// is dropped. Outside a runtime the sweep is skipped and only lazy
    /// eviction applies.
    pub fn with_sweeper(default_ttl: Duration, interval: Duration) -> Self {
        let mut cache = Self::new(default_ttl);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) if !interval.is_zero() => {
                let weak = Arc::downgrade(&cache.entries);
                cache.sweeper = Some(handle.spawn(sweep_loop(weak, interval)));
                debug!(interval_ms = interval.as_millis(), "Cache sweeper started");
            }
            Ok(_) => {
                warn!("Cache sweep interval is zero, background sweep disabled");
            }
            Err(_) => {
                warn!("No tokio runtime available, cache background sweep disabled");
            }
        }

        cache
    }

    /// Default TTL applied when no hint or intrinsic expiry is available
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// TTL that [`Cache::set`] would assign to `value`
    ///
    /// Values with an intrinsic expiry get 90% of their remaining lifetime
    /// (zero if already past it); others get `hint`, else the default TTL.
    pub fn effective_ttl(&self, value: &V, hint: Option<Duration>) -> Duration {
        match value.expires_at() {
            Some(expires_at) => {
                let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                remaining.mul_f64(LIFETIME_FRACTION)
            }
            None => hint.unwrap_or(self.default_ttl),
        }
    }

    /// Remaining lifetime of the entry stored under `key`
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.read();
        entries
            .get(key)
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now()))
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries)
    }

    /// Whether a background sweep task is attached
    pub fn has_sweeper(&self) -> bool {
        self.sweeper.is_some()
    }
}

impl<V: Cacheable> Cache<V> for MemoryCache<V> {
    fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = self.effective_ttl(&value, ttl);
        if ttl.is_zero() {
            debug!("Skipping cache insert for value with no remaining lifetime");
            self.entries.write().remove(key);
            return;
        }

        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key.to_string(), entry);
        trace!(key, ttl_ms = ttl.as_millis(), "Cached entry");
    }

    fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired by TTL or by the value's own clock: evict now, unless a
        // writer replaced it with a live value since the read lock was released
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(key)
            && !entry.is_live(now)
        {
            entries.remove(key);
            debug!("Evicted expired cache entry on access");
        }
        None
    }

    fn delete(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    fn size(&self) -> usize {
        self.entries.read().len()
    }
}

impl<V> Drop for MemoryCache<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

fn purge<V: Cacheable>(entries: &Entries<V>) -> usize {
    let now = Instant::now();
    let mut entries = entries.write();
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before - entries.len()
}

async fn sweep_loop<V: Cacheable>(entries: Weak<Entries<V>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(entries) = entries.upgrade() else {
            break;
        };
        let removed = purge(&entries);
        if removed > 0 {
            debug!(removed, "Cache sweep removed expired entries");
        }
    }
}
