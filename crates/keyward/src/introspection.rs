//! OAuth 2.0 Token Introspection (RFC 7662)
//!
//! Used for opaque tokens and as the fallback when local JWT verification
//! fails. Introspection also catches revocation, which a JWT signature
//! cannot express, so results are cached for a shorter time than JWKS keys.
//!
//! # Example
//!
//! ```rust,no_run
//! use keyward::introspection::IntrospectionClient;
//! use secrecy::SecretString;
//!
//! # async fn example() -> keyward::Result<()> {
//! let client = IntrospectionClient::new(
//!     "https://auth.example.com/oauth/introspect",
//!     "resource-server",
//!     SecretString::new("client-secret".to_string()),
//! );
//!
//! let introspection = client.introspect("opaque-token").await?;
//! if introspection.active {
//!     println!("Subject: {:?}", introspection.sub);
//! }
//! # Ok(())
//! # }
//! ```

use crate::cache::{Cache, MemoryCache};
use crate::error::{Error, Result};
use crate::resolver::{ResolverEntry, cached_entry};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Default lifetime of cached introspection results
pub const DEFAULT_INTROSPECTION_TTL: Duration = Duration::from_secs(300);

fn cache_key(token: &str) -> String {
    format!("introspection_{token}")
}

/// Introspection response per RFC 7662 Section 2.2, plus role/authority lists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenIntrospection {
    /// Whether the token is currently active (REQUIRED)
    pub active: bool,

    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Client the token was issued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Human-readable resource owner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Space-delimited scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Token type (Bearer, etc.)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Expiration time
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub exp: Option<DateTime<Utc>>,

    /// Issued at
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub iat: Option<DateTime<Utc>>,

    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Role labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    /// Authority labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorities: Vec<String>,

    /// Additional fields
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl TokenIntrospection {
    /// Inactive, or active with an `exp` already behind `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.active || self.exp.is_some_and(|exp| now > exp)
    }

    /// [`TokenIntrospection::is_expired_at`] against the current time
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Scopes as a list
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// Token introspection client with result caching
#[derive(Clone)]
pub struct IntrospectionClient {
    endpoint: String,
    client_id: String,
    client_secret: SecretString,
    http_client: reqwest::Client,
    cache: Arc<dyn Cache<ResolverEntry>>,
    ttl: Duration,
}

// Manual Debug impl to prevent client_secret exposure in logs
impl std::fmt::Debug for IntrospectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntrospectionClient")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("http_client", &"<reqwest::Client>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl IntrospectionClient {
    /// Client authenticating to `endpoint` with HTTP Basic credentials
    pub fn new(
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            client_secret,
            http_client: reqwest::Client::new(),
            cache: Arc::new(MemoryCache::<ResolverEntry>::default()),
            ttl: DEFAULT_INTROSPECTION_TTL,
        }
    }

    /// Use a caller-configured HTTP client
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// Share a cache with other resolvers
    pub fn with_cache(mut self, cache: Arc<dyn Cache<ResolverEntry>>) -> Self {
        self.cache = cache;
        self
    }

    /// Lifetime of cached results
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Introspection endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Introspect `token`, serving active results from cache when possible
    ///
    /// An inactive response is a successful call; only transport problems
    /// are errors.
    ///
    /// # Errors
    ///
    /// `IntrospectionUnreachable` on transport failure, non-2xx status or an
    /// unparsable body.
    pub async fn introspect(&self, token: &str) -> Result<TokenIntrospection> {
        let key = cache_key(token);
        if let Some(cached) = cached_entry(self.cache.as_ref(), &key, ResolverEntry::into_introspection)
        {
            debug!(endpoint = %self.endpoint, "Using cached introspection result");
            return Ok(cached);
        }

        let response = self
            .http_client
            .post(&self.endpoint)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| {
                error!(endpoint = %self.endpoint, error = %e, "Introspection request failed");
                Error::IntrospectionUnreachable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(endpoint = %self.endpoint, %status, "Introspection endpoint returned error status");
            return Err(Error::IntrospectionUnreachable(format!(
                "introspection endpoint returned status {status}"
            )));
        }

        let introspection: TokenIntrospection = response.json().await.map_err(|e| {
            error!(endpoint = %self.endpoint, error = %e, "Failed to parse introspection response");
            Error::IntrospectionUnreachable(format!("invalid introspection body: {e}"))
        })?;

        debug!(
            endpoint = %self.endpoint,
            active = introspection.active,
            "Token introspected"
        );

        // Only active, unexpired results are cached
        if !introspection.is_expired() {
            self.cache.set(
                &key,
                ResolverEntry::Introspection(introspection.clone()),
                Some(self.ttl),
            );
        }

        Ok(introspection)
    }

    /// Drop the cached result for `token`
    pub fn invalidate(&self, token: &str) {
        self.cache.delete(&cache_key(token));
    }
}
