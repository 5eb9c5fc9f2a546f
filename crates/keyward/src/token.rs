//! OAuth access token records

use crate::cache::Cacheable;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens are treated as expired this long before their actual expiry
pub const CLOCK_SKEW_BUFFER: Duration = Duration::seconds(30);

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// An access token plus the metadata needed to decide whether it is still usable
///
/// Immutable once issued; a refresh produces a new `Token`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The bearer credential
    pub access_token: String,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Refresh credential, if the issuer returned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Absolute expiry (Unix seconds on the wire)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    /// Space-delimited scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

// Manual Debug impl to keep credentials out of logs
impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

impl Token {
    /// Create a bearer token
    pub fn bearer(access_token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            refresh_token: None,
            expires_at,
            scope: None,
        }
    }

    /// Attach a refresh token
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Attach scopes
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Valid at `now`: non-empty and more than [`CLOCK_SKEW_BUFFER`] from expiry
    ///
    /// A token without an expiry never expires by the clock.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => now + CLOCK_SKEW_BUFFER < expires_at,
            None => true,
        }
    }

    /// Whether the token is usable right now
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Inverse of [`Token::is_valid`]
    pub fn is_expired(&self) -> bool {
        !self.is_valid()
    }

    /// Scopes as a list
    pub fn scopes(&self) -> Vec<&str> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }
}

impl Cacheable for Token {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    fn is_expired(&self) -> bool {
        Token::is_expired(self)
    }
}

/// Token endpoint response body (RFC 6749 Section 5.1)
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// The issued access token
    pub access_token: String,

    /// Token type
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenResponse {
    /// Convert into a [`Token`], anchoring `expires_in` at `issued_at`
    pub fn into_token(self, issued_at: DateTime<Utc>) -> Token {
        let expires_at = self
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| issued_at + Duration::seconds(secs));

        Token {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token,
            expires_at,
            scope: self.scope,
        }
    }
}

impl From<TokenResponse> for Token {
    fn from(response: TokenResponse) -> Self {
        response.into_token(Utc::now())
    }
}
