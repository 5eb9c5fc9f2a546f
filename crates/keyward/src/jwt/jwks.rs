//! JWKS fetching with per-kid key caching
//!
//! Lookup order for a key ID:
//!
//! 1. decoded key cached under `jwks_key_{kid}`
//! 2. the cached key set under `jwks`
//! 3. a fresh `GET` of the JWKS endpoint (handles key rotation)
//!
//! Both the set and the decoded key are cached for the JWKS TTL. Fresh
//! fetches for unknown key IDs are rate limited by a minimum refresh
//! interval; inside it the cached set is the only source.

use crate::cache::{Cache, MemoryCache};
use crate::error::{Error, Result};
use crate::resolver::{ResolverEntry, cached_entry};
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::JwkSet;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default lifetime of cached keys and key sets
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(3600);

/// Default minimum time between two JWKS fetches
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

const JWKS_CACHE_KEY: &str = "jwks";

fn key_cache_key(kid: &str) -> String {
    format!("jwks_key_{kid}")
}

/// Resolves `kid` values to verification keys from a JWKS endpoint
///
/// # Example
///
/// ```rust,no_run
/// # use keyward::jwt::KeyResolver;
/// # async fn example() -> keyward::Result<()> {
/// let resolver = KeyResolver::new("https://auth.example.com/.well-known/jwks.json");
/// let key = resolver.get_public_key("key-2024-01").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct KeyResolver {
    jwks_url: String,
    http_client: reqwest::Client,
    cache: Arc<dyn Cache<ResolverEntry>>,
    ttl: Duration,
    /// Minimum refresh interval (rate limiting)
    min_refresh_interval: Duration,
    /// Last fetch attempt, shared between clones
    last_refresh: Arc<Mutex<Option<Instant>>>,
}

impl std::fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResolver")
            .field("jwks_url", &self.jwks_url)
            .field("http_client", &"<reqwest::Client>")
            .field("cached_entries", &self.cache.size())
            .field("ttl", &self.ttl)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .finish()
    }
}

impl KeyResolver {
    /// Resolver with its own cache and a default HTTP client
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            http_client: reqwest::Client::new(),
            cache: Arc::new(MemoryCache::<ResolverEntry>::default()),
            ttl: DEFAULT_JWKS_TTL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            last_refresh: Arc::new(Mutex::new(None)),
        }
    }

    /// Use a caller-configured HTTP client (timeouts, proxies, TLS roots)
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// Share a cache with other resolvers
    pub fn with_cache(mut self, cache: Arc<dyn Cache<ResolverEntry>>) -> Self {
        self.cache = cache;
        self
    }

    /// Lifetime of cached keys and key sets
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Minimum time between fetches triggered by unknown key IDs
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// JWKS endpoint URL
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Verification key for `kid`
    ///
    /// # Errors
    ///
    /// - `Fetch` if the endpoint is unreachable, non-2xx or returns an invalid body
    /// - `KeyNotFound` if `kid` is absent even from a freshly fetched set, or
    ///   absent from the cached set while refreshes are rate limited
    /// - `InvalidKey` if the JWK cannot be turned into a key
    pub async fn get_public_key(&self, kid: &str) -> Result<DecodingKey> {
        let cache_key = key_cache_key(kid);
        if let Some(key) = cached_entry(self.cache.as_ref(), &cache_key, ResolverEntry::into_key) {
            debug!(kid, "Using cached JWKS key");
            return Ok(key);
        }

        let cached_set = cached_entry(
            self.cache.as_ref(),
            JWKS_CACHE_KEY,
            ResolverEntry::into_key_set,
        );
        let jwk = match cached_set.as_ref().and_then(|set| set.find(kid)) {
            Some(jwk) => jwk.clone(),
            None if self.refresh_rate_limited() => {
                return Err(Error::KeyNotFound(kid.to_string()));
            }
            None => {
                // Unknown kid: the key may have been rotated since the set was cached
                debug!(kid, "Key ID not in cached JWKS, fetching fresh set");
                let set = self.fetch_key_set().await?;
                set.find(kid)
                    .cloned()
                    .ok_or_else(|| Error::KeyNotFound(kid.to_string()))?
            }
        };

        let key = DecodingKey::from_jwk(&jwk).map_err(|e| Error::InvalidKey {
            kid: kid.to_string(),
            reason: e.to_string(),
        })?;

        self.cache
            .set(&cache_key, ResolverEntry::Key(key.clone()), Some(self.ttl));
        Ok(key)
    }

    /// Fetch the key set from the endpoint and cache it, bypassing any cached copy
    ///
    /// # Errors
    ///
    /// `Fetch` on transport failure, non-2xx status or an unparsable body.
    pub async fn fetch_key_set(&self) -> Result<JwkSet> {
        info!(jwks_url = %self.jwks_url, "Fetching JWKS from endpoint");
        *self.last_refresh.lock() = Some(Instant::now());

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                error!(jwks_url = %self.jwks_url, error = %e, "Failed to fetch JWKS");
                Error::Fetch(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(jwks_url = %self.jwks_url, %status, "JWKS endpoint returned error status");
            return Err(Error::Fetch(format!("JWKS endpoint returned status {status}")));
        }

        let set: JwkSet = response.json().await.map_err(|e| {
            error!(jwks_url = %self.jwks_url, error = %e, "Failed to parse JWKS JSON");
            Error::Fetch(format!("invalid JWKS body: {e}"))
        })?;

        info!(
            jwks_url = %self.jwks_url,
            key_count = set.keys.len(),
            "Fetched JWKS"
        );

        self.cache
            .set(JWKS_CACHE_KEY, ResolverEntry::KeySet(set.clone()), Some(self.ttl));
        Ok(set)
    }

    /// Whether the last fetch attempt is within the minimum refresh interval
    fn refresh_rate_limited(&self) -> bool {
        let Some(last) = *self.last_refresh.lock() else {
            return false;
        };
        let since_last = last.elapsed();
        if since_last < self.min_refresh_interval {
            warn!(
                jwks_url = %self.jwks_url,
                since_last_ms = since_last.as_millis(),
                "JWKS refresh rate limited, using cache"
            );
            return true;
        }
        false
    }

    /// Forget the cached set and the decoded key for `kid`, allowing an immediate refetch
    pub fn invalidate(&self, kid: &str) {
        self.cache.delete(JWKS_CACHE_KEY);
        self.cache.delete(&key_cache_key(kid));
        *self.last_refresh.lock() = None;
        debug!(jwks_url = %self.jwks_url, kid, "JWKS cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_keys() {
        assert_eq!(key_cache_key("abc"), "jwks_key_abc");
        assert_eq!(JWKS_CACHE_KEY, "jwks");
    }

    #[test]
    fn test_builder_settings() {
        let resolver = KeyResolver::new("https://auth.example.com/jwks")
            .with_ttl(Duration::from_secs(120));
        assert_eq!(resolver.jwks_url(), "https://auth.example.com/jwks");
        assert_eq!(resolver.ttl, Duration::from_secs(120));
        assert!(format!("{resolver:?}").contains("jwks_url"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_fetch_error() {
        let resolver = KeyResolver::new("http://127.0.0.1:9/jwks");
        assert!(matches!(
            resolver.get_public_key("kid").await,
            Err(Error::Fetch(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_kid_refetch_is_rate_limited() {
        let resolver = KeyResolver::new("http://127.0.0.1:9/jwks")
            .with_min_refresh_interval(Duration::from_secs(60));

        assert!(matches!(
            resolver.get_public_key("kid-1").await,
            Err(Error::Fetch(_))
        ));
        // Within the interval no request is made
        assert!(matches!(
            resolver.get_public_key("kid-2").await,
            Err(Error::KeyNotFound(kid)) if kid == "kid-2"
        ));

        resolver.invalidate("kid-2");
        assert!(matches!(
            resolver.get_public_key("kid-2").await,
            Err(Error::Fetch(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_refresh_interval_disables_rate_limit() {
        let resolver = KeyResolver::new("http://127.0.0.1:9/jwks")
            .with_min_refresh_interval(Duration::ZERO);

        for _ in 0..3 {
            assert!(matches!(
                resolver.get_public_key("kid").await,
                Err(Error::Fetch(_))
            ));
        }
    }
}
