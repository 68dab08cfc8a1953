// src/config.rs

use crate::client::{discover_jwks_uri, HttpJwksFetcher};
use crate::error::ConfigError;
use jsonwebtoken::Algorithm;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Claims every token must carry in addition to those checked by the issuer,
/// audience and expiry rules.
pub const SHAPE_REQUIRED_CLAIMS: [&str; 4] = ["sub", "iat", "auth_time", "acr"];

/// Contains the validation settings applied to every token.
///
/// This struct configures the checks performed on the token's header and
/// claims, such as accepted algorithms and clock skew tolerance.
#[derive(Clone, Debug)]
pub struct ValidationDetails {
    /// The signing algorithms that are permitted, in order of preference.
    /// Tokens declaring any other algorithm are rejected before a key is looked up.
    pub algorithms: Vec<Algorithm>,
    /// The tolerance for clock skew when validating `exp`, `nbf` and `iat`.
    /// Defaults to 60 seconds.
    pub leeway: Duration,
    /// Claim names that must be present in addition to the claims shape.
    pub required_claims: Vec<String>,
}

impl Default for ValidationDetails {
    fn default() -> Self {
        Self {
            // Default to RS256, the most common algorithm for OIDC.
            algorithms: vec![Algorithm::RS256],
            leeway: Duration::from_secs(60),
            required_claims: Vec::new(),
        }
    }
}

/// Freshness and refresh policy for a cached JWKS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachePolicy {
    /// How long a fetched key set is served without a refresh, unless the
    /// provider sends a `Cache-Control: max-age`.
    pub ttl: Duration,
    /// Absolute age after which a key set is no longer served, even when
    /// refreshes keep failing.
    pub max_stale: Duration,
    /// Upper bound for a single JWKS fetch.
    pub fetch_timeout: Duration,
    /// How long a `kid` confirmed absent is answered without refetching.
    pub unknown_kid_ttl: Duration,
    /// Minimum delay between a failed refresh and the next attempt.
    pub refresh_cooldown: Duration,
    /// Minimum age of a fresh key set before an unknown `kid` may refresh it.
    pub min_refresh_interval: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10 * 60),
            max_stale: Duration::from_secs(24 * 60 * 60),
            fetch_timeout: Duration::from_secs(5),
            unknown_kid_ttl: Duration::from_secs(30),
            refresh_cooldown: Duration::from_secs(5),
            min_refresh_interval: Duration::from_secs(1),
        }
    }
}

/// Verification material configured directly instead of fetched from a JWKS.
#[derive(Clone, PartialEq, Eq)]
pub enum StaticKey {
    /// A shared secret for HMAC algorithms (HS256, HS384, HS512).
    SharedSecret(Vec<u8>),
    /// A PEM-encoded RSA or EC public key.
    PublicKeyPem(String),
}

impl fmt::Debug for StaticKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedSecret(_) => f.write_str("SharedSecret(<redacted>)"),
            Self::PublicKeyPem(pem) => f.debug_tuple("PublicKeyPem").field(pem).finish(),
        }
    }
}

/// Defines the source for token verification keys.
#[derive(Clone, Debug)]
pub enum KeySourceConfig {
    /// Keys are fetched from a JWKS endpoint and cached.
    Jwks {
        jwks_uri: Url,
        cache: CachePolicy,
    },
    /// A single key is configured up front. The token's `kid` is not consulted.
    Static(StaticKey),
}

/// The issuer configuration a validator is built from.
///
/// This struct is immutable once built. It should be constructed using the
/// `ConfigBuilder`.
#[derive(Clone, Debug)]
pub struct Config {
    /// The issuer identifier; the `iss` claim must equal it exactly.
    pub issuer: String,
    /// The accepted audiences; at least one must appear in the `aud` claim.
    pub audiences: Vec<String>,
    /// The specific validation parameters to apply to the token.
    pub validation: ValidationDetails,
    /// The source for obtaining verification keys.
    pub key_source: KeySourceConfig,
}

/// A builder for creating a `Config` instance.
///
/// This builder provides a fluent API to ensure that the configuration is
/// constructed correctly and with all required fields.
#[derive(Default)]
pub struct ConfigBuilder {
    issuer: Option<String>,
    audiences: Vec<String>,
    jwks_uri: Option<Url>,
    static_key: Option<StaticKey>,
    cache: CachePolicy,
    validation: ValidationDetails,
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the issuer of the OIDC provider. This is a required field.
    ///
    /// The value must be an absolute URL. It is stored verbatim and compared
    /// byte-for-byte against the `iss` claim.
    pub fn issuer(mut self, issuer: &str) -> Result<Self, ConfigError> {
        Url::parse(issuer).map_err(|e| ConfigError::InvalidUrl(format!("{issuer}: {e}")))?;
        self.issuer = Some(issuer.to_string());
        Ok(self)
    }

    /// Adds an accepted audience. At least one is required.
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audiences.push(audience.into());
        self
    }

    /// Replaces the accepted audiences.
    pub fn audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the JWKS URI keys are fetched from.
    /// This is mutually exclusive with a static key.
    pub fn jwks_uri(mut self, url: &str) -> Result<Self, ConfigError> {
        if self.static_key.is_some() {
            return Err(ConfigError::AmbiguousKeySource(
                "Cannot set JWKS URI when a static key is already configured.".to_string(),
            ));
        }
        let parsed_url = Url::parse(url).map_err(|e| ConfigError::InvalidUrl(format!("{url}: {e}")))?;
        self.jwks_uri = Some(parsed_url);
        Ok(self)
    }

    /// Sets the shared secret for HMAC algorithms (e.g., HS256).
    /// This is mutually exclusive with providing a JWKS URI.
    pub fn shared_secret(self, secret: Vec<u8>) -> Result<Self, ConfigError> {
        self.static_key(StaticKey::SharedSecret(secret))
    }

    /// Sets a PEM-encoded RSA or EC public key.
    /// This is mutually exclusive with providing a JWKS URI.
    pub fn public_key_pem(self, pem: impl Into<String>) -> Result<Self, ConfigError> {
        self.static_key(StaticKey::PublicKeyPem(pem.into()))
    }

    fn static_key(mut self, key: StaticKey) -> Result<Self, ConfigError> {
        if self.jwks_uri.is_some() {
            return Err(ConfigError::AmbiguousKeySource(
                "Cannot set a static key when a JWKS URI is already configured.".to_string(),
            ));
        }
        self.static_key = Some(key);
        Ok(self)
    }

    /// Sets the accepted signing algorithms.
    /// Defaults to `[Algorithm::RS256]` if not set.
    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.validation.algorithms = algorithms;
        self
    }

    /// Sets the clock skew tolerance. Defaults to 60 seconds.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway;
        self
    }

    /// Adds claim names that every token must carry.
    pub fn required_claims<I, S>(mut self, claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validation.required_claims.extend(claims.into_iter().map(Into::into));
        self
    }

    /// Sets the fallback cache TTL for the JWKS. Defaults to 10 minutes.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.ttl = ttl;
        self
    }

    /// Sets the absolute age after which cached keys are no longer served.
    /// Defaults to 24 hours.
    pub fn max_stale(mut self, max_stale: Duration) -> Self {
        self.cache.max_stale = max_stale;
        self
    }

    /// Sets the timeout for a single JWKS fetch. Defaults to 5 seconds.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.cache.fetch_timeout = timeout;
        self
    }

    /// Sets how long an unknown `kid` is remembered. Defaults to 30 seconds.
    pub fn unknown_kid_ttl(mut self, ttl: Duration) -> Self {
        self.cache.unknown_kid_ttl = ttl;
        self
    }

    /// Sets the delay between a failed refresh and the next attempt.
    /// Defaults to 5 seconds.
    pub fn refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.cache.refresh_cooldown = cooldown;
        self
    }

    /// Sets how old a fresh key set must be before a lookup for an unknown
    /// `kid` refetches it. Defaults to 1 second.
    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.cache.min_refresh_interval = interval;
        self
    }

    /// Consumes the builder and returns a `Config` object.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing, if no key source was
    /// configured, or if the accepted algorithms cannot be served by the key source.
    pub fn build(self) -> Result<Config, ConfigError> {
        let issuer = self
            .issuer
            .ok_or_else(|| ConfigError::MissingConfiguration("issuer".to_string()))?;
        if self.audiences.iter().all(|a| a.is_empty()) {
            return Err(ConfigError::MissingConfiguration("audience".to_string()));
        }
        if self.validation.algorithms.is_empty() {
            return Err(ConfigError::MissingConfiguration("algorithms".to_string()));
        }

        let key_source = match (self.jwks_uri, self.static_key) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::AmbiguousKeySource(
                    "Both a static key and a JWKS URI are configured.".to_string(),
                ));
            }
            (Some(jwks_uri), None) => {
                validate_cache_policy(&self.cache)?;
                KeySourceConfig::Jwks { jwks_uri, cache: self.cache }
            }
            (None, Some(key)) => KeySourceConfig::Static(key),
            (None, None) => {
                return Err(ConfigError::MissingConfiguration(
                    "jwks_uri or a static key".to_string(),
                ));
            }
        };
        validate_algorithm_families(&self.validation.algorithms, &key_source)?;

        Ok(Config {
            issuer,
            audiences: self.audiences.into_iter().filter(|a| !a.is_empty()).collect(),
            validation: self.validation,
            key_source,
        })
    }

    /// Like [`build`](Self::build), but resolves the JWKS URI through OIDC
    /// discovery when neither a JWKS URI nor a static key was set.
    pub async fn build_with_discovery(mut self) -> Result<Config, ConfigError> {
        if self.jwks_uri.is_none() && self.static_key.is_none() {
            let issuer = self
                .issuer
                .as_deref()
                .ok_or_else(|| ConfigError::MissingConfiguration("issuer".to_string()))?;
            let fetcher = HttpJwksFetcher::new(self.cache.fetch_timeout)?;
            self.jwks_uri = Some(discover_jwks_uri(fetcher.http_client(), issuer).await?);
        }
        self.build()
    }
}

fn validate_cache_policy(cache: &CachePolicy) -> Result<(), ConfigError> {
    if cache.ttl.is_zero() || cache.fetch_timeout.is_zero() {
        return Err(ConfigError::InvalidConfiguration(
            "cache_ttl and fetch_timeout must be greater than zero".to_string(),
        ));
    }
    if cache.max_stale < cache.ttl {
        return Err(ConfigError::InvalidConfiguration(
            "max_stale must be greater than or equal to cache_ttl".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Rejects algorithm sets the key source could be tricked into serving,
/// such as HMAC algorithms verified against public JWKS material.
fn validate_algorithm_families(
    algorithms: &[Algorithm],
    key_source: &KeySourceConfig,
) -> Result<(), ConfigError> {
    let hmac_only = matches!(key_source, KeySourceConfig::Static(StaticKey::SharedSecret(_)));
    if let Some(alg) = algorithms.iter().find(|alg| is_hmac(**alg) != hmac_only) {
        let reason = if hmac_only {
            "a shared secret only supports HS256, HS384 and HS512"
        } else {
            "HMAC algorithms require a shared secret"
        };
        return Err(ConfigError::InvalidConfiguration(format!("{alg:?} not allowed: {reason}")));
    }
    Ok(())
}
