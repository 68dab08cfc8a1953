// src/validator.rs

use crate::cache::KeyCache;
use crate::claims::{self, ValidatedClaims};
use crate::client::{HttpJwksFetcher, JwksFetcher};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, KeySourceConfig};
use crate::error::{ConfigError, ValidationError};
use crate::model::SigningKey;
use crate::token::RawToken;
use crate::verifier::{accept_algorithm, verify};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Where a validator gets its verification keys.
#[derive(Clone)]
enum KeySource {
    Jwks(KeyCache),
    Static(Arc<SigningKey>),
}

/// The bearer token validator.
///
/// This struct is initialized with a `Config` and should be created once
/// and reused for all validation requests. Cloning is cheap: clones share
/// the same key cache, so a refresh triggered through one clone benefits all.
#[derive(Clone)]
pub struct TokenValidator {
    config: Config,
    keys: KeySource,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.keys {
            KeySource::Jwks(cache) => cache.jwks_uri().as_str(),
            KeySource::Static(_) => "static",
        };
        f.debug_struct("TokenValidator")
            .field("issuer", &self.config.issuer)
            .field("audiences", &self.config.audiences)
            .field("key_source", &source)
            .finish_non_exhaustive()
    }
}

impl TokenValidator {
    /// Creates a new `TokenValidator` with the given configuration.
    ///
    /// JWKS-backed validators fetch keys over HTTP lazily, on the first
    /// validation; nothing is fetched here.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        match &config.key_source {
            KeySourceConfig::Jwks { cache, .. } => {
                let fetcher = HttpJwksFetcher::new(cache.fetch_timeout).map_err(|e| {
                    ConfigError::InvalidConfiguration(format!("cannot build HTTP client: {e}"))
                })?;
                Self::with_fetcher(config, Arc::new(fetcher))
            }
            KeySourceConfig::Static(key) => {
                let keys = KeySource::Static(Arc::new(SigningKey::from_static(key)?));
                Ok(Self::from_parts(config, keys))
            }
        }
    }

    /// Creates a validator that retrieves keys through `fetcher`.
    ///
    /// The fetcher is ignored for static key sources.
    pub fn with_fetcher(config: Config, fetcher: Arc<dyn JwksFetcher>) -> Result<Self, ConfigError> {
        let keys = match &config.key_source {
            KeySourceConfig::Jwks { jwks_uri, cache } => {
                KeySource::Jwks(KeyCache::new(jwks_uri.clone(), fetcher, cache.clone()))
            }
            KeySourceConfig::Static(key) => KeySource::Static(Arc::new(SigningKey::from_static(key)?)),
        };
        Ok(Self::from_parts(config, keys))
    }

    fn from_parts(config: Config, keys: KeySource) -> Self {
        Self {
            config,
            keys,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the time source used for `exp`, `nbf` and `iat` checks.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The key cache, for JWKS-backed validators.
    pub fn key_cache(&self) -> Option<&KeyCache> {
        match &self.keys {
            KeySource::Jwks(cache) => Some(cache),
            KeySource::Static(_) => None,
        }
    }

    /// Validates a bearer token.
    ///
    /// This method performs a full validation of the token:
    /// 1. Structure and header decoding.
    /// 2. The declared algorithm against the accepted set.
    /// 3. Key resolution through the key cache (or the static key). A JWKS
    ///    token without a `kid` is malformed.
    /// 4. Signature verification.
    /// 5. Issuer, audience, expiry, not-before and required-claim checks.
    ///
    /// Returns the claims only when every step succeeds.
    #[instrument(skip(self, token), err)]
    pub async fn validate(&self, token: &str) -> Result<ValidatedClaims, ValidationError> {
        let raw = RawToken::parse(token)?;
        let header = raw.header()?;

        let alg = accept_algorithm(&header.alg, &self.config.validation.algorithms)?;
        let key = self.resolve_key(header.kid.as_deref()).await?;

        if !verify(raw.signing_input(), raw.signature(), &key, alg) {
            return Err(ValidationError::SignatureInvalid(format!(
                "signature does not verify with key '{}' and {:?}",
                key.kid, alg
            )));
        }

        let payload = raw.payload()?;
        let claims = claims::validate(payload, &self.config, self.clock.now_secs())?;
        debug!("Token verified with key '{}'", key.kid);
        Ok(claims)
    }

    /// JWKS-backed validators need the header's `kid`; a static key ignores it.
    async fn resolve_key(&self, kid: Option<&str>) -> Result<Arc<SigningKey>, ValidationError> {
        match (&self.keys, kid) {
            (KeySource::Jwks(cache), Some(kid)) => Ok(cache.get_key(kid).await?),
            (KeySource::Jwks(_), None) => Err(ValidationError::MalformedToken("header has no 'kid'".to_string())),
            (KeySource::Static(key), _) => Ok(Arc::clone(key)),
        }
    }
}
