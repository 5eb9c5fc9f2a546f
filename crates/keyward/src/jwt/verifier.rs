//! Single-key JWT verification and signing
//!
//! `JwtVerifier` is configured with exactly one algorithm. Tokens whose
//! header names any other algorithm are rejected before the signature is
//! looked at, which rules out `none` and HMAC-with-public-key confusion.

use super::{ClaimRules, Claims, decode_signed, decode_unverified, split_segments};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, decode_header};
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, warn};

/// Lifetime given to tokens created without an explicit `exp`
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

const HMAC_ALGORITHMS: &[Algorithm] = &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// A token whose signature has been checked
#[derive(Debug, Clone)]
pub struct VerifiedJwt {
    /// Decoded JOSE header
    pub header: Header,
    /// Decoded claims (not yet checked against [`ClaimRules`])
    pub claims: Claims,
}

/// JWT verifier bound to one algorithm and key pair
///
/// # Example
///
/// ```rust
/// use jsonwebtoken::Algorithm;
/// use keyward::jwt::{ClaimRules, Claims, JwtVerifier};
///
/// let verifier = JwtVerifier::hmac(b"secret", Algorithm::HS256, ClaimRules::new("X", "Y"))?;
/// let token = verifier.create_token(Claims::for_subject("user-1"))?;
/// let claims = verifier.validate(&token)?;
/// assert_eq!(claims.subject, "user-1");
/// # Ok::<(), keyward::Error>(())
/// ```
#[derive(Clone)]
pub struct JwtVerifier {
    algorithm: Algorithm,
    encoding_key: Option<EncodingKey>,
    decoding_key: DecodingKey,
    rules: ClaimRules,
    default_ttl: Duration,
}

// Manual Debug impl to keep key material out of logs
impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithm", &self.algorithm)
            .field("can_sign", &self.encoding_key.is_some())
            .field("rules", &self.rules)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl JwtVerifier {
    /// Shared-secret verifier (HS256/384/512 only)
    ///
    /// # Errors
    ///
    /// `Config` when `algorithm` is not an HMAC algorithm or the secret is empty.
    pub fn hmac(secret: &[u8], algorithm: Algorithm, rules: ClaimRules) -> Result<Self> {
        if !HMAC_ALGORITHMS.contains(&algorithm) {
            return Err(Error::Config(format!(
                "{algorithm:?} is not an HMAC algorithm"
            )));
        }
        if secret.is_empty() {
            return Err(Error::Config("HMAC secret must not be empty".to_string()));
        }

        Ok(Self::with_keys(
            algorithm,
            Some(EncodingKey::from_secret(secret)),
            DecodingKey::from_secret(secret),
            rules,
        ))
    }

    /// RSA verifier from PEM keys; without a private key the verifier cannot sign
    ///
    /// # Errors
    ///
    /// `Config` for a non-RSA algorithm or unparsable PEM.
    pub fn rsa_pem(
        algorithm: Algorithm,
        private_pem: Option<&[u8]>,
        public_pem: &[u8],
        rules: ClaimRules,
    ) -> Result<Self> {
        if !matches!(
            algorithm,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ) {
            return Err(Error::Config(format!("{algorithm:?} is not an RSA algorithm")));
        }

        let encoding_key = private_pem
            .map(EncodingKey::from_rsa_pem)
            .transpose()
            .map_err(|e| Error::Config(format!("invalid RSA private key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| Error::Config(format!("invalid RSA public key: {e}")))?;

        Ok(Self::with_keys(algorithm, encoding_key, decoding_key, rules))
    }

    /// Verifier from pre-built keys
    pub fn with_keys(
        algorithm: Algorithm,
        encoding_key: Option<EncodingKey>,
        decoding_key: DecodingKey,
        rules: ClaimRules,
    ) -> Self {
        Self {
            algorithm,
            encoding_key,
            decoding_key,
            rules,
            default_ttl: DEFAULT_TOKEN_TTL,
        }
    }

    /// HMAC verifier from the `signing` section of an [`EngineConfig`]
    ///
    /// # Errors
    ///
    /// `Config` when no signing section is present or it is invalid.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let signing = config
            .signing
            .as_ref()
            .ok_or_else(|| Error::Config("no signing configuration".to_string()))?;

        let verifier = Self::hmac(
            signing.secret.expose_secret().as_bytes(),
            signing.algorithm,
            config.claim_rules(),
        )?;
        Ok(verifier.with_default_ttl(signing.token_ttl))
    }

    /// Lifetime for tokens created without `exp`
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Configured algorithm
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Claim rules applied by [`JwtVerifier::validate`]
    pub fn rules(&self) -> &ClaimRules {
        &self.rules
    }

    /// Check structure, algorithm and signature; claims are returned unchecked
    ///
    /// # Errors
    ///
    /// `MalformedToken` for structural problems, `SignatureInvalid` for an
    /// algorithm mismatch or a failed signature check.
    pub fn parse(&self, token: &str) -> Result<VerifiedJwt> {
        split_segments(token)?;
        let header = decode_header(token)
            .map_err(|e| Error::MalformedToken(format!("invalid header: {e}")))?;

        if header.alg != self.algorithm {
            warn!(
                expected = ?self.algorithm,
                actual = ?header.alg,
                "Rejected token with unexpected signing algorithm"
            );
            return Err(Error::SignatureInvalid(format!(
                "unexpected signing method {:?}",
                header.alg
            )));
        }

        let claims = decode_signed(token, &self.decoding_key, self.algorithm)?;
        Ok(VerifiedJwt { header, claims })
    }

    /// Decode the payload WITHOUT verifying the signature
    ///
    /// Never use the result for access decisions.
    ///
    /// # Errors
    ///
    /// `MalformedToken` when the token or payload cannot be decoded.
    pub fn extract_claims(&self, token: &str) -> Result<Claims> {
        decode_unverified(token)
    }

    /// [`JwtVerifier::parse`] followed by every claim predicate
    ///
    /// # Errors
    ///
    /// As `parse`, plus `ClaimsInvalid` for the first failing predicate.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let verified = self.parse(token)?;
        verified.claims.validate_at(&self.rules, Utc::now())?;
        debug!(subject = %verified.claims.subject, "JWT validated");
        Ok(verified.claims)
    }

    /// Sign `claims`, filling `iat`, `exp`, `iss` and `aud` when unset
    ///
    /// # Errors
    ///
    /// `Signing` when this verifier has no private key or encoding fails.
    pub fn create_token(&self, mut claims: Claims) -> Result<String> {
        let now = Utc::now();
        claims.issued_at.get_or_insert(now);
        if claims.expires_at.is_none() {
            claims.expires_at = Some(now + to_chrono(self.default_ttl)?);
        }
        if claims.issuer.is_none() {
            claims.issuer.clone_from(&self.rules.issuer);
        }
        if claims.audience.is_empty()
            && let Some(audience) = &self.rules.audience
        {
            claims.audience.push(audience.clone());
        }

        self.sign(&claims)
    }

    /// Re-issue `token` with `iat = now` and `exp = now + new_ttl`
    ///
    /// The original signature is not checked; callers must have validated
    /// the token first.
    ///
    /// # Errors
    ///
    /// `MalformedToken` when the token cannot be decoded, `Signing` when it
    /// cannot be re-signed.
    pub fn refresh_token(&self, token: &str, new_ttl: Duration) -> Result<String> {
        let mut claims = self.extract_claims(token)?;
        let now = Utc::now();
        claims.issued_at = Some(now);
        claims.expires_at = Some(now + to_chrono(new_ttl)?);
        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        let key = self
            .encoding_key
            .as_ref()
            .ok_or_else(|| Error::Signing("verifier has no signing key".to_string()))?;

        jsonwebtoken::encode(&Header::new(self.algorithm), claims, key)
            .map_err(|e| Error::Signing(e.to_string()))
    }
}

fn to_chrono(ttl: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(ttl).map_err(|e| Error::Signing(format!("invalid token TTL: {e}")))
}
