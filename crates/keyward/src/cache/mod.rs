//! In-memory TTL caching for tokens, signing keys and introspection results
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  StatsCache<C>       │  hit/miss counters (observability only)
//! │    └─ MemoryCache<V> │  RwLock<HashMap>, lazy + periodic eviction
//! └──────────────────────┘
//! ```
//!
//! Both layers implement [`Cache`], so anything that accepts a
//! `Arc<dyn Cache<V>>` can be handed either one.
//!
//! Values that know their own expiry (see [`Cacheable`]) are cached for 90%
//! of their remaining lifetime, and are re-checked on every read so a value
//! that expired by its own clock is never served, whatever the sweep timing.

pub mod memory;
pub mod stats;

pub use memory::MemoryCache;
pub use stats::{CacheStats, StatsCache};

use chrono::{DateTime, Utc};

/// A value that can be stored in a [`Cache`]
pub trait Cacheable: Clone + Send + Sync + 'static {
    /// Absolute expiry carried by the value itself, if any
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Whether the value has expired by its own rules
    fn is_expired(&self) -> bool {
        false
    }
}

impl Cacheable for String {}

impl Cacheable for serde_json::Value {}

/// Key/value cache with per-entry time-to-live
///
/// `ttl` is a hint: values with an intrinsic expiry ignore it, and `None`
/// falls back to the implementation's default TTL.
pub trait Cache<V>: Send + Sync {
    /// Store `value` under `key`
    fn set(&self, key: &str, value: V, ttl: Option<std::time::Duration>);

    /// Fetch a live value
    fn get(&self, key: &str) -> Option<V>;

    /// Remove `key` if present
    fn delete(&self, key: &str);

    /// Remove everything
    fn clear(&self);

    /// Number of stored entries (may include entries awaiting eviction)
    fn size(&self) -> usize;
}

impl<V, C> Cache<V> for std::sync::Arc<C>
where
    C: Cache<V> + ?Sized,
{
    fn set(&self, key: &str, value: V, ttl: Option<std::time::Duration>) {
        (**self).set(key, value, ttl)
    }

    fn get(&self, key: &str) -> Option<V> {
        (**self).get(key)
    }

    fn delete(&self, key: &str) {
        (**self).delete(key)
    }

    fn clear(&self) {
        (**self).clear()
    }

    fn size(&self) -> usize {
        (**self).size()
    }
}
