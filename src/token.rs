// src/token.rs

use crate::error::ValidationError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

/// The JOSE header fields the validator reads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// The declared signing algorithm, unparsed.
    pub alg: String,
    pub kid: Option<String>,
    pub typ: Option<String>,
}

/// A compact JWS split into its three segments. Nothing in it is trusted
/// until the signature over `signing_input()` has been verified.
#[derive(Debug, Clone, Copy)]
pub struct RawToken<'a> {
    header: &'a str,
    payload: &'a str,
    signature: &'a str,
    signing_input: &'a str,
}

impl<'a> RawToken<'a> {
    /// Splits `token` on `.` into exactly three non-empty segments.
    pub fn parse(token: &'a str) -> Result<Self, ValidationError> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            return Err(ValidationError::MalformedToken(
                "expected three dot-separated segments".to_string(),
            ));
        };
        if header.is_empty() || payload.is_empty() || signature.is_empty() {
            return Err(ValidationError::MalformedToken("empty token segment".to_string()));
        }

        Ok(Self {
            header,
            payload,
            signature,
            signing_input: &token[..header.len() + 1 + payload.len()],
        })
    }

    /// `header '.' payload`, the bytes the signature covers.
    pub fn signing_input(&self) -> &'a [u8] {
        self.signing_input.as_bytes()
    }

    /// The base64url-encoded signature segment.
    pub fn signature(&self) -> &'a str {
        self.signature
    }

    pub fn header(&self) -> Result<TokenHeader, ValidationError> {
        decode_segment(self.header, "header")
    }

    /// Decodes the payload, which must be a JSON object.
    pub fn payload(&self) -> Result<Map<String, Value>, ValidationError> {
        decode_segment(self.payload, "payload")
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str, name: &str) -> Result<T, ValidationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| ValidationError::MalformedToken(format!("{name} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ValidationError::MalformedToken(format!("invalid {name}: {e}")))
}
