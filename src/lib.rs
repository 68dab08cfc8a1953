// src/lib.rs

//! Validates bearer tokens issued by an OpenID Connect provider.
//!
//! A [`TokenValidator`](validator::TokenValidator) checks the token's
//! signature against keys from the issuer's JWKS (cached, refreshed on
//! demand) or a statically configured key, then checks its claims.

pub mod cache;
pub mod claims;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod settings;
pub mod token;
pub mod validator;
pub mod verifier;

/// The public prelude for the `oidc-token-validator` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::cache::KeyCache;
    pub use crate::claims::ValidatedClaims;
    pub use crate::client::{HttpJwksFetcher, JwksFetcher};
    pub use crate::clock::{Clock, FixedClock, SystemClock};
    pub use crate::config::{CachePolicy, Config, ConfigBuilder, KeySourceConfig, StaticKey};
    pub use crate::error::{ConfigError, FailureKind, FetchError, ValidationError};
    pub use crate::settings::{ValidatorKind, ValidatorSettings};
    pub use crate::validator::TokenValidator;
    pub use jsonwebtoken::Algorithm;
}
