// src/error.rs

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The reason a token was rejected, without the detail text.
///
/// Useful for metrics labels and for mapping failures to HTTP responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    MalformedToken,
    AlgorithmRejected,
    UnknownKey,
    KeySourceUnavailable,
    SignatureInvalid,
    IssuerMismatch,
    AudienceMismatch,
    TokenExpired,
    TokenNotYetValid,
    MissingRequiredClaim,
}

/// The terminal outcome of a rejected `validate()` call.
///
/// Every variant carries a human-readable detail string. No variant ever
/// carries claim data from the rejected token.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The token is not a well-formed compact JWS, or a segment failed to decode.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The algorithm declared in the token header is not accepted.
    #[error("Algorithm rejected: {0}")]
    AlgorithmRejected(String),

    /// No signing key exists for the token's `kid`, even after a refresh.
    #[error("Unknown signing key: {0}")]
    UnknownKey(String),

    /// The key source could not be reached and no usable cached keys exist.
    #[error("Key source unavailable: {0}")]
    KeySourceUnavailable(String),

    /// Cryptographic verification of the signature failed.
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// The `iss` claim does not match the configured issuer.
    #[error("Issuer mismatch: {0}")]
    IssuerMismatch(String),

    /// None of the `aud` values is an accepted audience.
    #[error("Audience mismatch: {0}")]
    AudienceMismatch(String),

    /// The `exp` claim lies in the past beyond the clock skew tolerance.
    #[error("Token expired: {0}")]
    TokenExpired(String),

    /// The `nbf` or `iat` claim lies in the future beyond the clock skew tolerance.
    #[error("Token not yet valid: {0}")]
    TokenNotYetValid(String),

    /// A required claim is absent or has the wrong type.
    #[error("Missing required claim: {0}")]
    MissingRequiredClaim(String),
}

impl ValidationError {
    /// Returns the failure kind of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MalformedToken(_) => FailureKind::MalformedToken,
            Self::AlgorithmRejected(_) => FailureKind::AlgorithmRejected,
            Self::UnknownKey(_) => FailureKind::UnknownKey,
            Self::KeySourceUnavailable(_) => FailureKind::KeySourceUnavailable,
            Self::SignatureInvalid(_) => FailureKind::SignatureInvalid,
            Self::IssuerMismatch(_) => FailureKind::IssuerMismatch,
            Self::AudienceMismatch(_) => FailureKind::AudienceMismatch,
            Self::TokenExpired(_) => FailureKind::TokenExpired,
            Self::TokenNotYetValid(_) => FailureKind::TokenNotYetValid,
            Self::MissingRequiredClaim(_) => FailureKind::MissingRequiredClaim,
        }
    }

    /// Returns the human-readable detail string.
    pub fn detail(&self) -> &str {
        match self {
            Self::MalformedToken(d)
            | Self::AlgorithmRejected(d)
            | Self::UnknownKey(d)
            | Self::KeySourceUnavailable(d)
            | Self::SignatureInvalid(d)
            | Self::IssuerMismatch(d)
            | Self::AudienceMismatch(d)
            | Self::TokenExpired(d)
            | Self::TokenNotYetValid(d)
            | Self::MissingRequiredClaim(d) => d,
        }
    }
}

/// Errors raised while retrieving or parsing a JSON Web Key Set.
#[derive(Debug, Error)]
pub enum FetchError {
    /// An error occurred during an HTTP request, including non-2xx statuses.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was not a valid JWKS or discovery document.
    #[error("Malformed document: {0}")]
    Decode(#[from] serde_json::Error),

    /// The fetch did not complete within the configured timeout.
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The document parsed, but none of its keys could be used.
    #[error("JWKS contains no usable signing keys")]
    NoUsableKeys,

    /// A single JWK is malformed or unsupported.
    #[error("Invalid JWK format: {0}")]
    InvalidKeyFormat(String),

    /// The discovery document advertises a different issuer than the one configured.
    #[error("Discovery issuer mismatch: expected {expected}, found {found}")]
    IssuerMismatch { expected: String, found: String },

    /// A URL in a discovery document could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The refresh task ended without producing a result.
    #[error("Refresh task aborted: {0}")]
    Aborted(String),
}

/// A failed key lookup in the key cache.
#[derive(Debug, Clone, Error)]
pub enum KeyLookupError {
    /// The key set was refreshed successfully and still lacks this `kid`.
    #[error("no key with kid '{0}' in the key set")]
    UnknownKey(String),

    /// The refresh failed and no usable key set covers this `kid`.
    #[error("key source unavailable: {0}")]
    Unavailable(Arc<FetchError>),
}

impl From<KeyLookupError> for ValidationError {
    fn from(error: KeyLookupError) -> Self {
        match error {
            KeyLookupError::UnknownKey(_) => ValidationError::UnknownKey(error.to_string()),
            KeyLookupError::Unavailable(_) => ValidationError::KeySourceUnavailable(error.to_string()),
        }
    }
}

/// Errors raised while building a validator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Both a JWKS URI and a static key were configured.
    #[error("Ambiguous key source configuration: {0}")]
    AmbiguousKeySource(String),

    /// A static key could not be parsed.
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// The settings sources could not be read or deserialized.
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// JWKS URI discovery failed.
    #[error("Discovery failed: {0}")]
    Discovery(#[from] FetchError),
}
