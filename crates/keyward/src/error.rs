//! Error types shared by every keyward component.
//!
//! Validation failures (bad signature, expired claims, unknown key) are
//! recoverable decisions: the resolver turns them into `valid = false` and
//! falls back to introspection. Only failures to *reach* a verifier
//! (`Fetch`, `IntrospectionUnreachable`) should be reported to clients as
//! "service unavailable" rather than "unauthorized".

use http::StatusCode;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Token validation and engine errors
#[derive(Debug, Error)]
pub enum Error {
    /// Token is not three base64url segments, or a segment does not decode
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Unexpected signing method or failed cryptographic check
    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),

    /// A claim predicate failed (issuer, audience, time window, subject)
    #[error("Invalid claims: {0}")]
    ClaimsInvalid(#[from] ClaimsError),

    /// No key with this kid in the JWKS, even after a fresh fetch
    #[error("Key ID '{0}' not found in JWKS")]
    KeyNotFound(String),

    /// The JWK exists but cannot be turned into a verification key
    #[error("Invalid JWK '{kid}': {reason}")]
    InvalidKey {
        /// Key ID of the offending JWK
        kid: String,
        /// Decoder error
        reason: String,
    },

    /// JWKS endpoint unreachable, non-2xx, or returned an unparsable body
    #[error("JWKS fetch failed: {0}")]
    Fetch(String),

    /// Introspection endpoint unreachable, non-2xx, or returned an unparsable body
    #[error("Introspection endpoint unreachable: {0}")]
    IntrospectionUnreachable(String),

    /// Token could not be signed (missing key, encoder failure)
    #[error("Token signing failed: {0}")]
    Signing(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller cancelled validation while a network call was in flight
    #[error("Token validation cancelled")]
    Cancelled,
}

impl Error {
    /// True when identity could not be determined because a verifier was unreachable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::IntrospectionUnreachable(_))
    }

    /// HTTP status a calling layer should answer with
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedToken(_)
            | Self::SignatureInvalid(_)
            | Self::ClaimsInvalid(_)
            | Self::KeyNotFound(_)
            | Self::InvalidKey { .. } => StatusCode::UNAUTHORIZED,
            Self::Fetch(_) | Self::IntrospectionUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Self::Signing(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Claim predicate failures, in evaluation order
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimsError {
    #[error("issuer mismatch: expected '{expected}', got {actual:?}")]
    IssuerMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("audience mismatch: '{expected}' not in token audience")]
    AudienceMismatch { expected: String },

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("token issued in the future")]
    IssuedInFuture,

    #[error("token has no subject")]
    MissingSubject,
}
