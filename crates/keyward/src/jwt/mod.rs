//! JWT claims model, claim predicates, local verification and JWKS key resolution
//!
//! # Modules
//!
//! - `verifier` - single-key JWT parse/validate/sign (symmetric or RSA)
//! - `jwks` - JWKS fetching with per-kid key caching
//!
//! Claim predicates live here so the local verifier and the JWKS-backed
//! resolver apply exactly the same rules.

pub mod jwks;
pub mod verifier;

pub use jwks::KeyResolver;
pub use verifier::{JwtVerifier, VerifiedJwt};

use crate::error::{ClaimsError, Error, Result};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Tolerance for `iat` values slightly in the future
pub const DEFAULT_ISSUED_AT_TOLERANCE: Duration = Duration::from_secs(60);

/// Registered claims (RFC 7519) plus the ERP identity fields
///
/// Timestamps are Unix seconds on the wire. `aud` accepts either a string
/// or an array. Unknown claims (e.g. `email`, `name`) land in
/// `custom_claims`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub)
    #[serde(rename = "sub", default)]
    pub subject: String,

    /// Issuer (iss)
    #[serde(rename = "iss", default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Audience (aud)
    #[serde(
        rename = "aud",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "audience::deserialize"
    )]
    pub audience: Vec<String>,

    /// Expiration time (exp)
    #[serde(
        rename = "exp",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    /// Not before (nbf)
    #[serde(
        rename = "nbf",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub not_before: Option<DateTime<Utc>>,

    /// Issued at (iat)
    #[serde(
        rename = "iat",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub issued_at: Option<DateTime<Utc>>,

    /// JWT ID (jti)
    #[serde(rename = "jti", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Role labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    /// Authority labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorities: Vec<String>,

    /// OAuth scopes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    /// Organization the subject acts for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Department within the organization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,

    /// Tenant (multi-tenant deployments)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Everything else in the payload
    #[serde(flatten)]
    pub custom_claims: HashMap<String, Value>,
}

impl Claims {
    /// Claims for `subject` with every other field empty
    pub fn for_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Default::default()
        }
    }

    /// Read a custom claim as a string
    pub fn custom_str(&self, name: &str) -> Option<&str> {
        self.custom_claims.get(name).and_then(Value::as_str)
    }

    /// Read a custom claim into any deserializable type
    pub fn custom<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.custom_claims
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Run every claim predicate against `now`
    ///
    /// # Errors
    ///
    /// Returns the first failing predicate, checked in this order: issuer,
    /// audience, expiry, not-before, issued-at, subject.
    pub fn validate_at(
        &self,
        rules: &ClaimRules,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), ClaimsError> {
        if let Some(expected) = &rules.issuer
            && self.issuer.as_ref() != Some(expected)
        {
            return Err(ClaimsError::IssuerMismatch {
                expected: expected.clone(),
                actual: self.issuer.clone(),
            });
        }

        if let Some(expected) = &rules.audience
            && !self.audience.iter().any(|aud| aud == expected)
        {
            return Err(ClaimsError::AudienceMismatch {
                expected: expected.clone(),
            });
        }

        if let Some(exp) = self.expires_at
            && now > exp
        {
            return Err(ClaimsError::Expired);
        }

        if let Some(nbf) = self.not_before
            && now < nbf
        {
            return Err(ClaimsError::NotYetValid);
        }

        if let Some(iat) = self.issued_at
            && now < iat - rules.issued_at_tolerance()
        {
            return Err(ClaimsError::IssuedInFuture);
        }

        if self.subject.is_empty() {
            return Err(ClaimsError::MissingSubject);
        }

        Ok(())
    }

    /// [`Claims::validate_at`] against the current time
    ///
    /// # Errors
    ///
    /// See [`Claims::validate_at`].
    pub fn validate(&self, rules: &ClaimRules) -> std::result::Result<(), ClaimsError> {
        self.validate_at(rules, Utc::now())
    }
}

/// Expected issuer/audience and time tolerances for claim validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRules {
    /// Required `iss`, if any
    pub issuer: Option<String>,
    /// Audience value that must appear in `aud`, if any
    pub audience: Option<String>,
    /// How far in the future `iat` may be
    pub issued_at_tolerance: Duration,
}

impl Default for ClaimRules {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            issued_at_tolerance: DEFAULT_ISSUED_AT_TOLERANCE,
        }
    }
}

impl ClaimRules {
    /// Rules requiring both issuer and audience
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: Some(issuer.into()),
            audience: Some(audience.into()),
            ..Default::default()
        }
    }

    fn issued_at_tolerance(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.issued_at_tolerance).unwrap_or(chrono::Duration::MAX)
    }
}

/// Split a token into its three segments, checking each is non-empty base64url
pub(crate) fn split_segments(token: &str) -> Result<[&str; 3]> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::MalformedToken(
            "expected 3 dot-separated segments".to_string(),
        ));
    };

    for (name, segment) in [
        ("header", header),
        ("payload", payload),
        ("signature", signature),
    ] {
        if segment.is_empty() {
            return Err(Error::MalformedToken(format!("empty {name} segment")));
        }
        URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|e| Error::MalformedToken(format!("{name} is not base64url: {e}")))?;
    }

    Ok([header, payload, signature])
}

/// True when `token` has exactly three dot-separated segments
pub fn looks_like_jwt(token: &str) -> bool {
    token.split('.').count() == 3
}

/// Decode the payload without any signature check
///
/// Only for non-trust-boundary reads (metadata, refresh bookkeeping).
pub(crate) fn decode_unverified(token: &str) -> Result<Claims> {
    let [_, payload, _] = split_segments(token)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| Error::MalformedToken(format!("payload is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::MalformedToken(format!("payload is not a claims object: {e}")))
}

/// Verify the signature with `key` and decode claims, without time/issuer checks
///
/// Claim predicates are applied separately by [`Claims::validate_at`] so
/// every failure maps to a precise [`ClaimsError`].
pub(crate) fn decode_signed(token: &str, key: &DecodingKey, algorithm: Algorithm) -> Result<Claims> {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation.leeway = 0;

    jsonwebtoken::decode::<Claims>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(map_decode_error)
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> Error {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => Error::MalformedToken(err.to_string()),
        _ => Error::SignatureInvalid(err.to_string()),
    }
}

/// Serde helper for `aud`, which may be a single string or an array
mod audience {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
            Some(OneOrMany::One(aud)) => vec![aud],
            Some(OneOrMany::Many(auds)) => auds,
            None => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn valid_claims(now: DateTime<Utc>) -> Claims {
        Claims {
            subject: "user-1".into(),
            issuer: Some("X".into()),
            audience: vec!["Y".into()],
            expires_at: Some(now + ChronoDuration::hours(1)),
            issued_at: Some(now),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_claims_pass() {
        let now = Utc::now();
        let rules = ClaimRules::new("X", "Y");
        assert_eq!(valid_claims(now).validate_at(&rules, now), Ok(()));
    }

    #[test]
    fn test_issuer_mismatch() {
        let now = Utc::now();
        let mut claims = valid_claims(now);
        claims.issuer = Some("other".into());
        let err = claims.validate_at(&ClaimRules::new("X", "Y"), now).unwrap_err();
        assert!(matches!(err, ClaimsError::IssuerMismatch { .. }));
    }

    #[test]
    fn test_audience_mismatch() {
        let now = Utc::now();
        let mut claims = valid_claims(now);
        claims.audience = vec!["Z".into()];
        let err = claims.validate_at(&ClaimRules::new("X", "Y"), now).unwrap_err();
        assert_eq!(
            err,
            ClaimsError::AudienceMismatch {
                expected: "Y".into()
            }
        );
    }

    #[test]
    fn test_expired() {
        let now = Utc::now();
        let mut claims = valid_claims(now);
        claims.expires_at = Some(now - ChronoDuration::seconds(1));
        assert_eq!(
            claims.validate_at(&ClaimRules::new("X", "Y"), now),
            Err(ClaimsError::Expired)
        );
    }

    #[test]
    fn test_not_yet_valid() {
        let now = Utc::now();
        let mut claims = valid_claims(now);
        claims.not_before = Some(now + ChronoDuration::seconds(30));
        assert_eq!(
            claims.validate_at(&ClaimRules::default(), now),
            Err(ClaimsError::NotYetValid)
        );
    }

    #[test]
    fn test_issued_at_tolerance() {
        let now = Utc::now();
        let mut claims = valid_claims(now);

        claims.issued_at = Some(now + ChronoDuration::seconds(59));
        assert_eq!(claims.validate_at(&ClaimRules::default(), now), Ok(()));

        claims.issued_at = Some(now + ChronoDuration::seconds(61));
        assert_eq!(
            claims.validate_at(&ClaimRules::default(), now),
            Err(ClaimsError::IssuedInFuture)
        );
    }

    #[test]
    fn test_first_failing_predicate_wins() {
        let now = Utc::now();
        let mut claims = valid_claims(now);
        claims.issuer = Some("other".into());
        claims.audience = vec!["Z".into()];
        claims.expires_at = Some(now - ChronoDuration::seconds(1));

        let err = claims.validate_at(&ClaimRules::new("X", "Y"), now).unwrap_err();
        assert!(matches!(err, ClaimsError::IssuerMismatch { .. }));
    }

    #[test]
    fn test_missing_subject() {
        let now = Utc::now();
        let mut claims = valid_claims(now);
        claims.subject.clear();
        assert_eq!(
            claims.validate_at(&ClaimRules::default(), now),
            Err(ClaimsError::MissingSubject)
        );
    }

    #[test]
    fn test_claims_deserialize_erp_fields() {
        let claims: Claims = serde_json::from_value(json!({
            "sub": "42",
            "iss": "X",
            "aud": "Y",
            "exp": 2_000_000_000,
            "roles": ["ADMIN"],
            "authorities": ["WRITE_ACCESS"],
            "scopes": ["erp.read"],
            "organization_id": "org-1",
            "department_id": "dep-9",
            "tenant_id": "t-3",
            "email": "ada@example.com"
        }))
        .unwrap();

        assert_eq!(claims.subject, "42");
        assert_eq!(claims.audience, vec!["Y".to_string()]);
        assert_eq!(claims.expires_at.map(|t| t.timestamp()), Some(2_000_000_000));
        assert_eq!(claims.roles, vec!["ADMIN".to_string()]);
        assert_eq!(claims.organization_id.as_deref(), Some("org-1"));
        assert_eq!(claims.custom_str("email"), Some("ada@example.com"));
    }

    #[test]
    fn test_audience_array() {
        let claims: Claims = serde_json::from_value(json!({"sub": "1", "aud": ["A", "B"]})).unwrap();
        assert_eq!(claims.audience, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_split_segments() {
        assert!(split_segments("abc.def.ghi").is_ok());
        assert!(matches!(
            split_segments("abc.def"),
            Err(Error::MalformedToken(_))
        ));
        assert!(matches!(
            split_segments("abc..ghi"),
            Err(Error::MalformedToken(_))
        ));
        assert!(matches!(
            split_segments("a.b.c.d"),
            Err(Error::MalformedToken(_))
        ));
        assert!(matches!(
            split_segments("ab$.def.ghi"),
            Err(Error::MalformedToken(_))
        ));
    }

    #[test]
    fn test_looks_like_jwt() {
        assert!(looks_like_jwt("a.b.c"));
        assert!(!looks_like_jwt("abc.def"));
        assert!(!looks_like_jwt("opaque-token"));
    }

    #[test]
    fn test_decode_unverified() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"user-7","roles":["USER"]}"#);
        let token = format!("{header}.{payload}.c2ln");

        let claims = decode_unverified(&token).unwrap();
        assert_eq!(claims.subject, "user-7");
        assert_eq!(claims.roles, vec!["USER".to_string()]);
    }
}
