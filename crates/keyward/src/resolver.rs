//! Dual-strategy token resolution
//!
//! ```text
//! bearer token
//!   │
//!   ├─ 3 segments + JWKS configured ──► JWT path (kid → key → signature → claims)
//!   │                                        │ ok            │ any failure
//!   │                                        ▼               ▼
//!   │                                  valid via Jwt    introspection
//!   └─ anything else ──────────────────────────────────► introspection
//!                                                             │
//!                                        valid = active && not expired
//! ```
//!
//! JWT-path failures are logged and never surface as errors; the token is
//! handed to introspection instead. Only an unreachable introspection
//! endpoint escapes [`TokenResolver::validate_token`] as `Err`.

use crate::cache::memory::{DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
use crate::cache::{Cache, Cacheable, MemoryCache};
use crate::config::EngineConfig;
use crate::context::AuthorizationContext;
use crate::error::{Error, Result};
use crate::introspection::{DEFAULT_INTROSPECTION_TTL, IntrospectionClient, TokenIntrospection};
use crate::jwt::jwks::{DEFAULT_JWKS_TTL, DEFAULT_MIN_REFRESH_INTERVAL};
use crate::jwt::{ClaimRules, Claims, JwtVerifier, KeyResolver, looks_like_jwt, split_segments};
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, decode_header};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Value stored in the resolver's shared cache
#[derive(Clone)]
pub enum ResolverEntry {
    /// A whole JWKS document
    KeySet(JwkSet),
    /// A decoded verification key
    Key(DecodingKey),
    /// An introspection response
    Introspection(TokenIntrospection),
}

impl std::fmt::Debug for ResolverEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeySet(set) => f.debug_tuple("KeySet").field(&set.keys.len()).finish(),
            Self::Key(_) => f.write_str("Key(..)"),
            Self::Introspection(i) => f.debug_tuple("Introspection").field(&i.active).finish(),
        }
    }
}

impl ResolverEntry {
    /// Variant name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::KeySet(_) => "key_set",
            Self::Key(_) => "key",
            Self::Introspection(_) => "introspection",
        }
    }

    /// The key set, if this is one
    pub fn into_key_set(self) -> Option<JwkSet> {
        match self {
            Self::KeySet(set) => Some(set),
            _ => None,
        }
    }

    /// The decoded key, if this is one
    pub fn into_key(self) -> Option<DecodingKey> {
        match self {
            Self::Key(key) => Some(key),
            _ => None,
        }
    }

    /// The introspection result, if this is one
    pub fn into_introspection(self) -> Option<TokenIntrospection> {
        match self {
            Self::Introspection(introspection) => Some(introspection),
            _ => None,
        }
    }
}

// No intrinsic expiry: entries live for the TTL their producer passes, but an
// introspection result that has itself expired is never served.
impl Cacheable for ResolverEntry {
    fn is_expired(&self) -> bool {
        match self {
            Self::Introspection(introspection) => introspection.is_expired(),
            Self::KeySet(_) | Self::Key(_) => false,
        }
    }
}

/// Read `key` and project it to the expected variant
///
/// An entry of the wrong variant is discarded and reported as a miss.
pub(crate) fn cached_entry<T>(
    cache: &dyn Cache<ResolverEntry>,
    key: &str,
    project: fn(ResolverEntry) -> Option<T>,
) -> Option<T> {
    let entry = cache.get(key)?;
    let kind = entry.kind();
    let value = project(entry);
    if value.is_none() {
        // The key itself may embed a token, so only the variant is logged
        warn!(actual = kind, "Discarding cache entry of unexpected type");
        cache.delete(key);
    }
    value
}

/// Which strategy produced a [`ValidationResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSource {
    /// Local JWT verification against JWKS
    Jwt,
    /// RFC 7662 introspection
    Introspection,
}

impl std::fmt::Display for ValidationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jwt => f.write_str("jwt"),
            Self::Introspection => f.write_str("introspection"),
        }
    }
}

/// Outcome of one validation call; never cached
#[derive(Clone)]
pub struct ValidationResult {
    /// Whether the token authenticates its bearer
    pub valid: bool,
    /// The presented token
    pub token: String,
    /// Strategy that decided
    pub via: ValidationSource,
    /// Verified claims (JWT path)
    pub claims: Option<Claims>,
    /// Introspection response (introspection path)
    pub introspection: Option<TokenIntrospection>,
}

// Manual Debug impl to prevent token exposure in logs
impl std::fmt::Debug for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationResult")
            .field("valid", &self.valid)
            .field("token", &"[REDACTED]")
            .field("via", &self.via)
            .field("claims", &self.claims)
            .field("introspection", &self.introspection)
            .finish()
    }
}

impl ValidationResult {
    fn from_jwt(token: &str, claims: Claims) -> Self {
        Self {
            valid: true,
            token: token.to_string(),
            via: ValidationSource::Jwt,
            claims: Some(claims),
            introspection: None,
        }
    }

    fn from_introspection(token: &str, introspection: TokenIntrospection) -> Self {
        Self {
            valid: introspection.active && !introspection.is_expired(),
            token: token.to_string(),
            via: ValidationSource::Introspection,
            claims: None,
            introspection: Some(introspection),
        }
    }

    fn rejected(token: &str) -> Self {
        Self {
            valid: false,
            token: token.to_string(),
            via: ValidationSource::Jwt,
            claims: None,
            introspection: None,
        }
    }

    /// Subject from whichever strategy decided
    pub fn subject(&self) -> Option<&str> {
        match self.via {
            ValidationSource::Jwt => self.claims.as_ref().map(|c| c.subject.as_str()),
            ValidationSource::Introspection => {
                self.introspection.as_ref().and_then(|i| i.sub.as_deref())
            }
        }
    }
}

/// Anything that can turn a bearer token into a validation decision
///
/// Implemented by [`TokenResolver`]; handlers can depend on
/// `Arc<dyn TokenValidator>` and swap in a stub under test.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate `token`
    async fn validate_token(&self, token: &str) -> Result<ValidationResult>;

    /// Validate `token` and build the request's authorization context
    async fn authenticate(&self, token: &str) -> Result<AuthorizationContext> {
        let result = self.validate_token(token).await?;
        Ok(AuthorizationContext::from_validation(&result))
    }
}

/// Validates bearer tokens locally via JWKS, falling back to introspection
///
/// # Example
///
/// ```rust,no_run
/// use keyward::resolver::TokenResolver;
/// use secrecy::SecretString;
///
/// # async fn example() -> keyward::Result<()> {
/// let resolver = TokenResolver::builder()
///     .jwks_url("https://auth.example.com/.well-known/jwks.json")
///     .introspection(
///         "https://auth.example.com/oauth/introspect",
///         "erp-api",
///         SecretString::new("secret".to_string()),
///     )
///     .issuer("https://auth.example.com")
///     .audience("erp-api")
///     .build()?;
///
/// let context = resolver.authenticate("eyJhbGciOi...").await?;
/// println!("authenticated: {}", context.authenticated);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TokenResolver {
    key_resolver: Option<KeyResolver>,
    introspection: Option<IntrospectionClient>,
    expected_algorithm: Algorithm,
    rules: ClaimRules,
    cache: Arc<dyn Cache<ResolverEntry>>,
}

impl std::fmt::Debug for TokenResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResolver")
            .field("key_resolver", &self.key_resolver)
            .field("introspection", &self.introspection)
            .field("expected_algorithm", &self.expected_algorithm)
            .field("rules", &self.rules)
            .field("cached_entries", &self.cache.size())
            .finish()
    }
}

impl TokenResolver {
    /// Start building a resolver
    pub fn builder() -> TokenResolverBuilder {
        TokenResolverBuilder::default()
    }

    /// Resolver described by `config`
    ///
    /// # Errors
    ///
    /// `Config` when the configuration fails [`EngineConfig::validate`] or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::builder()
            .expected_algorithm(config.expected_algorithm)
            .claim_rules(config.claim_rules())
            .default_ttl(config.cache.default_ttl)
            .jwks_ttl(config.cache.jwks_ttl)
            .introspection_ttl(config.cache.introspection_ttl)
            .sweep_interval(config.cache.sweep_interval);

        if let Some(jwks_url) = &config.jwks_url {
            builder = builder.jwks_url(jwks_url.clone());
        }
        if let Some(introspection) = &config.introspection {
            builder = builder.introspection(
                introspection.endpoint.clone(),
                introspection.client_id.clone(),
                introspection.client_secret.clone(),
            );
        }
        if let Some(timeout) = config.http_timeout {
            let http_client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
            builder = builder.http_client(http_client);
        }

        builder.build()
    }

    /// Cache shared by key resolution and introspection
    pub fn cache(&self) -> &Arc<dyn Cache<ResolverEntry>> {
        &self.cache
    }

    /// JWKS key resolver, if configured
    pub fn key_resolver(&self) -> Option<&KeyResolver> {
        self.key_resolver.as_ref()
    }

    /// Introspection client, if configured
    pub fn introspection_client(&self) -> Option<&IntrospectionClient> {
        self.introspection.as_ref()
    }

    /// Claim rules for the JWT path
    pub fn rules(&self) -> &ClaimRules {
        &self.rules
    }

    /// Validate `token`, JWT first, introspection as fallback
    ///
    /// # Errors
    ///
    /// `IntrospectionUnreachable` when the fallback endpoint cannot be
    /// reached. Every other failure yields `Ok` with `valid == false`.
    pub async fn validate_token(&self, token: &str) -> Result<ValidationResult> {
        match &self.key_resolver {
            Some(keys) if looks_like_jwt(token) => match self.validate_jwt(keys, token).await {
                Ok(claims) => {
                    debug!(via = %ValidationSource::Jwt, subject = %claims.subject, "Token validated");
                    return Ok(ValidationResult::from_jwt(token, claims));
                }
                Err(e) => {
                    warn!(error = %e, "JWT validation failed, falling back to introspection");
                }
            },
            Some(_) => debug!("Token is not a JWT, using introspection"),
            None => debug!("No JWKS configured, using introspection"),
        }

        let Some(client) = &self.introspection else {
            debug!("No introspection endpoint configured, rejecting token");
            return Ok(ValidationResult::rejected(token));
        };

        let introspection = client.introspect(token).await?;
        let result = ValidationResult::from_introspection(token, introspection);
        debug!(via = %result.via, valid = result.valid, "Token introspected");
        Ok(result)
    }

    /// [`TokenResolver::validate_token`], abandoned as soon as `cancel` fires
    ///
    /// # Errors
    ///
    /// `Cancelled` when `cancel` fires first, otherwise as `validate_token`.
    pub async fn validate_token_with_cancel(
        &self,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Token validation cancelled by caller");
                Err(Error::Cancelled)
            }
            result = self.validate_token(token) => result,
        }
    }

    /// Validate `token` and build an [`AuthorizationContext`]
    ///
    /// # Errors
    ///
    /// As [`TokenResolver::validate_token`].
    pub async fn authenticate(&self, token: &str) -> Result<AuthorizationContext> {
        let result = self.validate_token(token).await?;
        Ok(AuthorizationContext::from_validation(&result))
    }

    async fn validate_jwt(&self, keys: &KeyResolver, token: &str) -> Result<Claims> {
        split_segments(token)?;
        let header = decode_header(token)
            .map_err(|e| Error::MalformedToken(format!("invalid header: {e}")))?;

        if header.alg != self.expected_algorithm {
            return Err(Error::SignatureInvalid(format!(
                "unexpected signing method {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| Error::MalformedToken("JWT header has no kid".to_string()))?;

        let key = keys.get_public_key(&kid).await?;
        JwtVerifier::with_keys(self.expected_algorithm, None, key, self.rules.clone())
            .validate(token)
    }
}

#[async_trait]
impl TokenValidator for TokenResolver {
    async fn validate_token(&self, token: &str) -> Result<ValidationResult> {
        TokenResolver::validate_token(self, token).await
    }

    async fn authenticate(&self, token: &str) -> Result<AuthorizationContext> {
        TokenResolver::authenticate(self, token).await
    }
}

/// Builder for [`TokenResolver`]
#[derive(Default)]
pub struct TokenResolverBuilder {
    jwks_url: Option<String>,
    introspection: Option<(String, String, SecretString)>,
    expected_algorithm: Option<Algorithm>,
    rules: ClaimRules,
    default_ttl: Option<Duration>,
    jwks_ttl: Option<Duration>,
    introspection_ttl: Option<Duration>,
    sweep_interval: Option<Duration>,
    jwks_min_refresh_interval: Option<Duration>,
    cache: Option<Arc<dyn Cache<ResolverEntry>>>,
    http_client: Option<reqwest::Client>,
}

impl std::fmt::Debug for TokenResolverBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResolverBuilder")
            .field("jwks_url", &self.jwks_url)
            .field(
                "introspection_endpoint",
                &self.introspection.as_ref().map(|(endpoint, _, _)| endpoint),
            )
            .field("expected_algorithm", &self.expected_algorithm)
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl TokenResolverBuilder {
    /// JWKS endpoint for the JWT path
    pub fn jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = Some(url.into());
        self
    }

    /// Introspection endpoint and its Basic-auth credentials
    pub fn introspection(
        mut self,
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        self.introspection = Some((endpoint.into(), client_id.into(), client_secret));
        self
    }

    /// Algorithm JWT headers must declare (default RS256)
    pub fn expected_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.expected_algorithm = Some(algorithm);
        self
    }

    /// Replace all claim rules
    pub fn claim_rules(mut self, rules: ClaimRules) -> Self {
        self.rules = rules;
        self
    }

    /// Required issuer
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.rules.issuer = Some(issuer.into());
        self
    }

    /// Required audience
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.rules.audience = Some(audience.into());
        self
    }

    /// TTL for cache entries stored without a hint
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// TTL for JWKS sets and decoded keys
    pub fn jwks_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_ttl = Some(ttl);
        self
    }

    /// TTL for introspection results
    pub fn introspection_ttl(mut self, ttl: Duration) -> Self {
        self.introspection_ttl = Some(ttl);
        self
    }

    /// Minimum time between JWKS fetches triggered by unknown key IDs (default 5s)
    pub fn jwks_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.jwks_min_refresh_interval = Some(interval);
        self
    }

    /// Background purge interval for the built-in cache (default 60s)
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Use an existing cache (e.g. a `StatsCache`) instead of a new one
    pub fn cache(mut self, cache: Arc<dyn Cache<ResolverEntry>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// HTTP client for JWKS and introspection calls
    pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Build the resolver
    ///
    /// # Errors
    ///
    /// `Config` when neither strategy is configured or the expected algorithm
    /// is symmetric.
    pub fn build(self) -> Result<TokenResolver> {
        if self.jwks_url.is_none() && self.introspection.is_none() {
            return Err(Error::Config(
                "at least one of JWKS URL or introspection endpoint is required".to_string(),
            ));
        }

        let expected_algorithm = self.expected_algorithm.unwrap_or(Algorithm::RS256);
        if matches!(
            expected_algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(Error::Config(format!(
                "JWKS verification requires an asymmetric algorithm, got {expected_algorithm:?}"
            )));
        }

        let cache: Arc<dyn Cache<ResolverEntry>> = match self.cache {
            Some(cache) => cache,
            None => Arc::new(MemoryCache::<ResolverEntry>::with_sweeper(
                self.default_ttl.unwrap_or(DEFAULT_TTL),
                self.sweep_interval.unwrap_or(DEFAULT_SWEEP_INTERVAL),
            )),
        };
        let http_client = self.http_client.unwrap_or_default();

        let key_resolver = self.jwks_url.map(|url| {
            KeyResolver::new(url)
                .with_http_client(http_client.clone())
                .with_cache(cache.clone())
                .with_ttl(self.jwks_ttl.unwrap_or(DEFAULT_JWKS_TTL))
                .with_min_refresh_interval(
                    self.jwks_min_refresh_interval
                        .unwrap_or(DEFAULT_MIN_REFRESH_INTERVAL),
                )
        });

        let introspection = self.introspection.map(|(endpoint, client_id, secret)| {
            IntrospectionClient::new(endpoint, client_id, secret)
                .with_http_client(http_client.clone())
                .with_cache(cache.clone())
                .with_ttl(self.introspection_ttl.unwrap_or(DEFAULT_INTROSPECTION_TTL))
        });

        Ok(TokenResolver {
            key_resolver,
            introspection,
            expected_algorithm,
            rules: self.rules,
            cache,
        })
    }
}
