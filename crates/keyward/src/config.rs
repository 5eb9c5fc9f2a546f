//! Engine configuration
//!
//! Loaded from JSON (`EngineConfig::from_json`) or from `KEYWARD_*`
//! environment variables (`EngineConfig::from_env`). Durations are whole
//! seconds on the wire; secrets are held in [`SecretString`] and never
//! printed by `Debug`.

use crate::error::{Error, Result};
use crate::jwt::ClaimRules;
use crate::rbac::RbacConfig;
use jsonwebtoken::Algorithm;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Prefix of every environment variable read by [`EngineConfig::from_env`]
pub const ENV_PREFIX: &str = "KEYWARD_";

/// Top-level configuration for token validation and RBAC
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Required `iss` claim
    #[serde(default)]
    pub issuer: Option<String>,

    /// Audience that must appear in `aud`
    #[serde(default)]
    pub audience: Option<String>,

    /// JWKS endpoint for local JWT verification
    #[serde(default)]
    pub jwks_url: Option<String>,

    /// Algorithm JWT headers must declare
    #[serde(default = "default_expected_algorithm")]
    pub expected_algorithm: Algorithm,

    /// Introspection endpoint and credentials
    #[serde(default)]
    pub introspection: Option<IntrospectionConfig>,

    /// Symmetric signing key for locally issued tokens
    #[serde(default)]
    pub signing: Option<SigningConfig>,

    /// Cache lifetimes
    #[serde(default)]
    pub cache: CacheConfig,

    /// Timeout for JWKS and introspection requests
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub http_timeout: Option<Duration>,

    /// RBAC hierarchies and policy flags
    #[serde(default)]
    pub rbac: RbacConfig,
}

/// RFC 7662 endpoint and the resource server's Basic-auth credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionConfig {
    /// Introspection endpoint URL
    pub endpoint: String,
    /// Client ID
    pub client_id: String,
    /// Client secret
    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub client_secret: SecretString,
}

/// HMAC key used by [`crate::jwt::JwtVerifier::from_config`]
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// HS256, HS384 or HS512
    #[serde(default = "default_signing_algorithm")]
    pub algorithm: Algorithm,
    /// Shared secret
    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub secret: SecretString,
    /// Lifetime of created tokens without an explicit `exp`
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_token_ttl")]
    pub token_ttl: Duration,
}

/// Cache lifetimes
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries stored without a TTL hint
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_cache_ttl")]
    pub default_ttl: Duration,
    /// JWKS sets and decoded keys
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_jwks_ttl")]
    pub jwks_ttl: Duration,
    /// Introspection results; must be shorter than `jwks_ttl`
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_introspection_ttl")]
    pub introspection_ttl: Duration,
    /// Background purge interval
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_cache_ttl(),
            jwks_ttl: default_jwks_ttl(),
            introspection_ttl: default_introspection_ttl(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            jwks_url: None,
            expected_algorithm: default_expected_algorithm(),
            introspection: None,
            signing: None,
            cache: CacheConfig::default(),
            http_timeout: None,
            rbac: RbacConfig::default(),
        }
    }
}

fn default_expected_algorithm() -> Algorithm {
    Algorithm::RS256
}

fn default_signing_algorithm() -> Algorithm {
    Algorithm::HS256
}

fn default_token_ttl() -> Duration {
    crate::jwt::verifier::DEFAULT_TOKEN_TTL
}

fn default_cache_ttl() -> Duration {
    crate::cache::memory::DEFAULT_TTL
}

fn default_jwks_ttl() -> Duration {
    crate::jwt::jwks::DEFAULT_JWKS_TTL
}

fn default_introspection_ttl() -> Duration {
    crate::introspection::DEFAULT_INTROSPECTION_TTL
}

fn default_sweep_interval() -> Duration {
    crate::cache::memory::DEFAULT_SWEEP_INTERVAL
}

// Custom serialization for SecretString
fn serialize_secret<S>(secret: &SecretString, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

// Custom deserialization for SecretString
fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    Ok(SecretString::new(s))
}

impl EngineConfig {
    /// Parse a JSON document
    ///
    /// # Errors
    ///
    /// `Config` when the document does not match the schema.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid config JSON: {e}")))
    }

    /// Defaults overridden by `KEYWARD_*` environment variables
    ///
    /// # Errors
    ///
    /// `Config` when a variable is present but unparsable.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup` (called with full variable names)
    ///
    /// Recognized variables, all prefixed with `KEYWARD_`: `ISSUER`,
    /// `AUDIENCE`, `JWKS_URL`, `EXPECTED_ALGORITHM`, `INTROSPECTION_URL`,
    /// `CLIENT_ID`, `CLIENT_SECRET`, `SIGNING_ALGORITHM`, `SIGNING_SECRET`,
    /// `DEFAULT_TTL_SECS`, `JWKS_TTL_SECS`, `INTROSPECTION_TTL_SECS`,
    /// `SWEEP_INTERVAL_SECS`, `HTTP_TIMEOUT_SECS`, `RBAC_CASE_SENSITIVE`,
    /// `RBAC_DEFAULT_DENY_ALL`.
    ///
    /// # Errors
    ///
    /// `Config` when a variable is present but unparsable, or when
    /// `INTROSPECTION_URL` is set without both client credentials.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(issuer) = var("ISSUER") {
            self.issuer = Some(issuer);
        }
        if let Some(audience) = var("AUDIENCE") {
            self.audience = Some(audience);
        }
        if let Some(jwks_url) = var("JWKS_URL") {
            self.jwks_url = Some(jwks_url);
        }
        if let Some(algorithm) = var("EXPECTED_ALGORITHM") {
            self.expected_algorithm = parse_algorithm("EXPECTED_ALGORITHM", &algorithm)?;
        }

        if let Some(endpoint) = var("INTROSPECTION_URL") {
            let (Some(client_id), Some(client_secret)) = (var("CLIENT_ID"), var("CLIENT_SECRET"))
            else {
                return Err(Error::Config(format!(
                    "{ENV_PREFIX}INTROSPECTION_URL requires {ENV_PREFIX}CLIENT_ID and {ENV_PREFIX}CLIENT_SECRET"
                )));
            };
            self.introspection = Some(IntrospectionConfig {
                endpoint,
                client_id,
                client_secret: SecretString::new(client_secret),
            });
        }

        if let Some(secret) = var("SIGNING_SECRET") {
            let algorithm = match var("SIGNING_ALGORITHM") {
                Some(algorithm) => parse_algorithm("SIGNING_ALGORITHM", &algorithm)?,
                None => default_signing_algorithm(),
            };
            self.signing = Some(SigningConfig {
                algorithm,
                secret: SecretString::new(secret),
                token_ttl: default_token_ttl(),
            });
        }

        if let Some(ttl) = parse_secs(&var, "DEFAULT_TTL_SECS")? {
            self.cache.default_ttl = ttl;
        }
        if let Some(ttl) = parse_secs(&var, "JWKS_TTL_SECS")? {
            self.cache.jwks_ttl = ttl;
        }
        if let Some(ttl) = parse_secs(&var, "INTROSPECTION_TTL_SECS")? {
            self.cache.introspection_ttl = ttl;
        }
        if let Some(interval) = parse_secs(&var, "SWEEP_INTERVAL_SECS")? {
            self.cache.sweep_interval = interval;
        }
        if let Some(timeout) = parse_secs(&var, "HTTP_TIMEOUT_SECS")? {
            self.http_timeout = Some(timeout);
        }

        if let Some(flag) = parse_bool(&var, "RBAC_CASE_SENSITIVE")? {
            self.rbac.case_sensitive = flag;
        }
        if let Some(flag) = parse_bool(&var, "RBAC_DEFAULT_DENY_ALL")? {
            self.rbac.default_deny_all = flag;
        }

        Ok(self)
    }

    /// Claim rules derived from `issuer` and `audience`
    pub fn claim_rules(&self) -> ClaimRules {
        ClaimRules {
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
            ..ClaimRules::default()
        }
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// `Config` when no verification strategy is configured, an endpoint
    /// URL is invalid or not HTTPS (plain HTTP is allowed for loopback
    /// hosts), the introspection TTL is not shorter than the JWKS TTL, the
    /// expected algorithm is symmetric, a secret is empty, or an RBAC
    /// hierarchy is cyclic.
    pub fn validate(&self) -> Result<()> {
        if self.jwks_url.is_none() && self.introspection.is_none() {
            return Err(Error::Config(
                "at least one of jwks_url or introspection must be configured".to_string(),
            ));
        }

        if let Some(jwks_url) = &self.jwks_url {
            validate_endpoint("jwks_url", jwks_url)?;
        }

        if let Some(introspection) = &self.introspection {
            validate_endpoint("introspection.endpoint", &introspection.endpoint)?;
            if introspection.client_id.is_empty()
                || introspection.client_secret.expose_secret().is_empty()
            {
                return Err(Error::Config(
                    "introspection client credentials must not be empty".to_string(),
                ));
            }
        }

        if matches!(
            self.expected_algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(Error::Config(format!(
                "expected_algorithm must be asymmetric, got {:?}",
                self.expected_algorithm
            )));
        }

        if let Some(signing) = &self.signing
            && signing.secret.expose_secret().is_empty()
        {
            return Err(Error::Config("signing secret must not be empty".to_string()));
        }

        if self.cache.introspection_ttl >= self.cache.jwks_ttl {
            return Err(Error::Config(format!(
                "introspection_ttl ({}s) must be shorter than jwks_ttl ({}s)",
                self.cache.introspection_ttl.as_secs(),
                self.cache.jwks_ttl.as_secs()
            )));
        }

        self.rbac.validate()
    }
}

fn validate_endpoint(name: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).map_err(|e| Error::Config(format!("{name} is not a URL: {e}")))?;

    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(&url) => Ok(()),
        scheme => Err(Error::Config(format!(
            "{name} must use HTTPS (HTTP only allowed for loopback hosts), got {scheme}://"
        ))),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn parse_algorithm(name: &str, value: &str) -> Result<Algorithm> {
    Algorithm::from_str(value)
        .map_err(|e| Error::Config(format!("{ENV_PREFIX}{name}: unknown algorithm '{value}': {e}")))
}

fn parse_secs<F>(var: &F, name: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| Error::Config(format!("{ENV_PREFIX}{name}: {e}")))
        })
        .transpose()
}

fn parse_bool<F>(var: &F, name: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse::<bool>()
                .map_err(|e| Error::Config(format!("{ENV_PREFIX}{name}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.expected_algorithm, Algorithm::RS256);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(600));
        assert_eq!(config.cache.jwks_ttl, Duration::from_secs(3600));
        assert_eq!(config.cache.introspection_ttl, Duration::from_secs(300));
        assert_eq!(config.cache.sweep_interval, Duration::from_secs(60));
        assert!(config.rbac.default_deny_all);
        // No strategy configured yet
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json() {
        let config = EngineConfig::from_json(
            r#"{
                "issuer": "https://auth.example.com",
                "audience": "erp-api",
                "jwks_url": "https://auth.example.com/jwks",
                "introspection": {
                    "endpoint": "https://auth.example.com/introspect",
                    "client_id": "erp-api",
                    "client_secret": "s3cret"
                },
                "cache": {"jwks_ttl": 7200, "introspection_ttl": 120},
                "http_timeout": 5,
                "rbac": {"case_sensitive": false}
            }"#,
        )
        .unwrap();

        assert_eq!(config.cache.jwks_ttl, Duration::from_secs(7200));
        assert_eq!(config.cache.introspection_ttl, Duration::from_secs(120));
        assert_eq!(config.cache.default_ttl, Duration::from_secs(600));
        assert_eq!(config.http_timeout, Some(Duration::from_secs(5)));
        assert!(!config.rbac.case_sensitive);
        assert!(config.rbac.role_hierarchy.contains_key("ADMIN"));

        let rules = config.claim_rules();
        assert_eq!(rules.issuer.as_deref(), Some("https://auth.example.com"));
        assert_eq!(rules.audience.as_deref(), Some("erp-api"));

        config.validate().unwrap();
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            EngineConfig::from_json(r#"{"cache": {"jwks_ttl": "soon"}}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_secret_round_trip() {
        let config = EngineConfig {
            signing: Some(SigningConfig {
                algorithm: Algorithm::HS512,
                secret: SecretString::new("k".to_string()),
                token_ttl: Duration::from_secs(60),
            }),
            ..EngineConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back = EngineConfig::from_json(&json).unwrap();
        let signing = back.signing.unwrap();
        assert_eq!(signing.secret.expose_secret(), "k");
        assert_eq!(signing.algorithm, Algorithm::HS512);
        assert_eq!(signing.token_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::default()
            .with_env_overrides(env(&[
                ("KEYWARD_ISSUER", "X"),
                ("KEYWARD_AUDIENCE", "Y"),
                ("KEYWARD_JWKS_URL", "http://localhost:8080/jwks"),
                ("KEYWARD_EXPECTED_ALGORITHM", "PS256"),
                ("KEYWARD_INTROSPECTION_URL", "http://127.0.0.1:8080/introspect"),
                ("KEYWARD_CLIENT_ID", "api"),
                ("KEYWARD_CLIENT_SECRET", "secret"),
                ("KEYWARD_SIGNING_SECRET", "hmac"),
                ("KEYWARD_JWKS_TTL_SECS", "900"),
                ("KEYWARD_HTTP_TIMEOUT_SECS", "3"),
                ("KEYWARD_RBAC_DEFAULT_DENY_ALL", "false"),
            ]))
            .unwrap();

        assert_eq!(config.issuer.as_deref(), Some("X"));
        assert_eq!(config.expected_algorithm, Algorithm::PS256);
        assert_eq!(config.cache.jwks_ttl, Duration::from_secs(900));
        assert_eq!(config.http_timeout, Some(Duration::from_secs(3)));
        assert!(!config.rbac.default_deny_all);
        assert_eq!(
            config.signing.as_ref().map(|s| s.algorithm),
            Some(Algorithm::HS256)
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_env_errors() {
        assert!(
            EngineConfig::default()
                .with_env_overrides(env(&[("KEYWARD_JWKS_TTL_SECS", "soon")]))
                .is_err()
        );
        assert!(
            EngineConfig::default()
                .with_env_overrides(env(&[("KEYWARD_INTROSPECTION_URL", "https://a/b")]))
                .is_err()
        );
        assert!(
            EngineConfig::default()
                .with_env_overrides(env(&[("KEYWARD_EXPECTED_ALGORITHM", "XYZ")]))
                .is_err()
        );
    }

    #[test]
    fn test_validate_rejects_plain_http() {
        let config = EngineConfig {
            jwks_url: Some("http://auth.example.com/jwks".to_string()),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let local = EngineConfig {
            jwks_url: Some("http://[::1]:9000/jwks".to_string()),
            ..EngineConfig::default()
        };
        local.validate().unwrap();
    }

    #[test]
    fn test_validate_ttl_ordering() {
        let mut config = EngineConfig {
            jwks_url: Some("https://auth.example.com/jwks".to_string()),
            ..EngineConfig::default()
        };
        config.cache.introspection_ttl = config.cache.jwks_ttl;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("introspection_ttl"));
    }

    #[test]
    fn test_validate_symmetric_expected_algorithm() {
        let config = EngineConfig {
            jwks_url: Some("https://auth.example.com/jwks".to_string()),
            expected_algorithm: Algorithm::HS256,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_cyclic_rbac() {
        let mut config = EngineConfig {
            jwks_url: Some("https://auth.example.com/jwks".to_string()),
            ..EngineConfig::default()
        };
        config
            .rbac
            .role_hierarchy
            .insert("USER".to_string(), vec!["ADMIN".to_string()]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }
}
