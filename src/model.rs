// src/model.rs

use crate::config::StaticKey;
use crate::error::{ConfigError, FetchError};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Represents the data structure of an OIDC provider's discovery document.
/// Found at the `.well-known/openid-configuration` endpoint.
#[derive(Debug, Deserialize)]
pub struct OidcDiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
}

/// Represents a single JSON Web Key (JWK) as defined in RFC 7517.
#[derive(Debug, Deserialize)]
pub struct JsonWebKey {
    pub kid: Option<String>,
    pub kty: String,
    #[serde(rename = "use")]
    pub use_purpose: Option<String>,
    pub alg: Option<String>,
    // RSA
    pub n: Option<String>,
    pub e: Option<String>,
    // EC and OKP
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

/// Represents a JSON Web Key Set (JWKS).
///
/// Entries are kept as raw JSON so that one malformed key does not
/// invalidate the whole set.
#[derive(Debug, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<serde_json::Value>,
}

/// A parsed JWKS response.
#[derive(Debug)]
pub struct JwksDocument {
    /// The usable signing keys, in document order.
    pub keys: Vec<SigningKey>,
    /// The `Cache-Control: max-age` sent with the document, if any.
    pub max_age: Option<Duration>,
}

/// The family of cryptography a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Rsa,
    Ec,
    Ed,
    Hmac,
}

impl KeyFamily {
    /// Whether a key of this family can verify signatures made with `alg`.
    pub fn supports(self, alg: Algorithm) -> bool {
        use Algorithm::*;
        match self {
            KeyFamily::Rsa => matches!(alg, RS256 | RS384 | RS512 | PS256 | PS384 | PS512),
            KeyFamily::Ec => matches!(alg, ES256 | ES384),
            KeyFamily::Ed => alg == EdDSA,
            KeyFamily::Hmac => matches!(alg, HS256 | HS384 | HS512),
        }
    }
}

/// A verification key, immutable once constructed.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    pub family: KeyFamily,
    /// The algorithm the key is pinned to by its JWK `alg` member, if any.
    pub algorithm: Option<Algorithm>,
    pub decoding_key: DecodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Converts a JWK into a signing key.
    ///
    /// Encryption keys, symmetric keys, keys without a `kid` and keys of an
    /// unsupported type or curve are rejected.
    pub fn from_jwk(jwk: &JsonWebKey) -> Result<Self, FetchError> {
        let kid = jwk
            .kid
            .clone()
            .ok_or_else(|| FetchError::InvalidKeyFormat("missing 'kid'".into()))?;
        if jwk.use_purpose.as_deref().is_some_and(|u| u != "sig") {
            return Err(FetchError::InvalidKeyFormat(format!("key '{kid}' is not a signing key")));
        }
        let algorithm = jwk
            .alg
            .as_deref()
            .map(|alg| {
                Algorithm::from_str(alg).map_err(|_| {
                    FetchError::InvalidKeyFormat(format!("key '{kid}' has unsupported alg '{alg}'"))
                })
            })
            .transpose()?;

        let invalid = |e: jsonwebtoken::errors::Error| {
            FetchError::InvalidKeyFormat(format!("key '{kid}': {e}"))
        };

        let (family, decoding_key) = match jwk.kty.as_str() {
            "RSA" => {
                let key = DecodingKey::from_rsa_components(
                    component(&jwk.n, "RSA", &kid, "n")?,
                    component(&jwk.e, "RSA", &kid, "e")?,
                )
                .map_err(invalid)?;
                (KeyFamily::Rsa, key)
            }
            "EC" => match jwk.crv.as_deref() {
                Some("P-256") | Some("P-384") => {
                    let key = DecodingKey::from_ec_components(
                        component(&jwk.x, "EC", &kid, "x")?,
                        component(&jwk.y, "EC", &kid, "y")?,
                    )
                        .map_err(invalid)?;
                    (KeyFamily::Ec, key)
                }
                other => {
                    return Err(FetchError::InvalidKeyFormat(format!(
                        "key '{kid}' has unsupported curve {other:?}"
                    )));
                }
            },
            "OKP" if jwk.crv.as_deref() == Some("Ed25519") => {
                let key = DecodingKey::from_ed_components(component(&jwk.x, "OKP", &kid, "x")?).map_err(invalid)?;
                (KeyFamily::Ed, key)
            }
            other => {
                return Err(FetchError::InvalidKeyFormat(format!(
                    "key '{kid}' has unsupported key type '{other}'"
                )));
            }
        };

        if let Some(alg) = algorithm {
            if !family.supports(alg) {
                return Err(FetchError::InvalidKeyFormat(format!(
                    "key '{kid}' declares {alg:?}, which a {family:?} key cannot verify"
                )));
            }
        }

        Ok(Self { kid, family, algorithm, decoding_key })
    }

    /// Builds the signing key for a statically configured key source.
    pub fn from_static(key: &StaticKey) -> Result<Self, ConfigError> {
        let (family, decoding_key) = match key {
            StaticKey::SharedSecret(secret) => (KeyFamily::Hmac, DecodingKey::from_secret(secret)),
            StaticKey::PublicKeyPem(pem) => {
                // Try RSA first, then EC; the PEM label does not always say which.
                if let Ok(key) = DecodingKey::from_rsa_pem(pem.as_bytes()) {
                    (KeyFamily::Rsa, key)
                } else {
                    let key = DecodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| {
                        ConfigError::InvalidKeyFormat(format!("not an RSA or EC public key: {e}"))
                    })?;
                    (KeyFamily::Ec, key)
                }
            }
        };
        Ok(Self {
            kid: "static".to_string(),
            family,
            algorithm: None,
            decoding_key,
        })
    }
}

fn component<'a>(
    value: &'a Option<String>,
    kty: &str,
    kid: &str,
    name: &str,
) -> Result<&'a str, FetchError> {
    value
        .as_deref()
        .ok_or_else(|| FetchError::InvalidKeyFormat(format!("{kty} key '{kid}' missing '{name}' component")))
}

/// Parses a JWKS body into signing keys, skipping keys that cannot be used.
///
/// Fails only when the body is not a JWKS at all, or when no key survives.
pub fn parse_key_set(body: &[u8]) -> Result<Vec<SigningKey>, FetchError> {
    let set: JsonWebKeySet = serde_json::from_slice(body)?;
    let total = set.keys.len();

    let keys: Vec<SigningKey> = set
        .keys
        .into_iter()
        .filter_map(|entry| {
            let parsed = serde_json::from_value::<JsonWebKey>(entry)
                .map_err(FetchError::from)
                .and_then(|jwk| SigningKey::from_jwk(&jwk));
            match parsed {
                Ok(key) => Some(key),
                Err(reason) => {
                    debug!("Skipping JWK: {}", reason);
                    None
                }
            }
        })
        .collect();

    if keys.is_empty() {
        return Err(FetchError::NoUsableKeys);
    }
    debug!("Parsed {} usable keys out of {}", keys.len(), total);
    Ok(keys)
}
