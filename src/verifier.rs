// src/verifier.rs

use crate::error::ValidationError;
use crate::model::SigningKey;
use jsonwebtoken::Algorithm;
use std::str::FromStr;

/// Parses the header's declared algorithm and checks it against the accepted set.
///
/// Runs before any key is looked up. `none` and names `jsonwebtoken` does not
/// know are rejected like any other algorithm outside the set.
pub fn accept_algorithm(declared: &str, accepted: &[Algorithm]) -> Result<Algorithm, ValidationError> {
    match Algorithm::from_str(declared) {
        Ok(alg) if accepted.contains(&alg) => Ok(alg),
        Ok(_) => Err(ValidationError::AlgorithmRejected(format!(
            "{declared} is not an accepted algorithm"
        ))),
        Err(_) => Err(ValidationError::AlgorithmRejected(format!(
            "unsupported algorithm '{declared}'"
        ))),
    }
}

/// Verifies `signature` (base64url) over `signing_input` with `key`.
///
/// Returns `false` without touching the key material when the key's family
/// cannot produce `alg` or the key is pinned to another algorithm.
pub fn verify(signing_input: &[u8], signature: &str, key: &SigningKey, alg: Algorithm) -> bool {
    if !key.family.supports(alg) {
        return false;
    }
    if key.algorithm.is_some_and(|pinned| pinned != alg) {
        return false;
    }
    jsonwebtoken::crypto::verify(signature, signing_input, &key.decoding_key, alg).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::KeyFamily;
    use jsonwebtoken::{DecodingKey, EncodingKey};

    fn hmac_key(algorithm: Option<Algorithm>) -> SigningKey {
        SigningKey {
            kid: "k1".to_string(),
            family: KeyFamily::Hmac,
            algorithm,
            decoding_key: DecodingKey::from_secret(b"top-secret"),
        }
    }

    fn sign(message: &[u8], alg: Algorithm) -> String {
        jsonwebtoken::crypto::sign(message, &EncodingKey::from_secret(b"top-secret"), alg).unwrap()
    }

    #[test]
    fn algorithm_gate() {
        let accepted = [Algorithm::RS256, Algorithm::ES256];

        assert_eq!(accept_algorithm("RS256", &accepted).unwrap(), Algorithm::RS256);
        assert_eq!(accept_algorithm("ES256", &accepted).unwrap(), Algorithm::ES256);
        for declared in ["HS256", "none", "None", "rs256", ""] {
            assert!(
                matches!(accept_algorithm(declared, &accepted), Err(ValidationError::AlgorithmRejected(_))),
                "{declared:?} should be rejected"
            );
        }
    }

    #[test]
    fn verifies_matching_signature() {
        let signature = sign(b"header.payload", Algorithm::HS256);

        assert!(verify(b"header.payload", &signature, &hmac_key(None), Algorithm::HS256));
        assert!(!verify(b"header.payloaD", &signature, &hmac_key(None), Algorithm::HS256));
        assert!(!verify(b"header.payload", "bm90LWEtc2lnbmF0dXJl", &hmac_key(None), Algorithm::HS256));
        assert!(!verify(b"header.payload", "!!!", &hmac_key(None), Algorithm::HS256));
    }

    #[test]
    fn pinned_algorithm_must_match() {
        let signature = sign(b"header.payload", Algorithm::HS384);

        assert!(verify(b"header.payload", &signature, &hmac_key(Some(Algorithm::HS384)), Algorithm::HS384));
        assert!(!verify(b"header.payload", &signature, &hmac_key(Some(Algorithm::HS256)), Algorithm::HS384));
    }

    #[test]
    fn cross_family_is_never_attempted() {
        let signature = sign(b"header.payload", Algorithm::HS256);
        let rsa_key = SigningKey {
            kid: "rsa".to_string(),
            family: KeyFamily::Rsa,
            algorithm: None,
            decoding_key: DecodingKey::from_rsa_components("sXch", "AQAB").unwrap(),
        };

        assert!(!verify(b"header.payload", &signature, &rsa_key, Algorithm::HS256));
    }
}
