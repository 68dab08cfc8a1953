// src/claims.rs

use crate::config::{Config, SHAPE_REQUIRED_CLAIMS};
use crate::error::ValidationError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The claims of a token that passed every check.
///
/// The fixed fields are the ones every accepted token carries. Standard
/// profile attributes are typed when present; any other claim is kept
/// verbatim in `extra`, as is a profile attribute whose value does not fit
/// its field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedClaims {
    pub iss: String,
    pub sub: String,
    #[serde(deserialize_with = "one_or_many")]
    pub aud: Vec<String>,
    pub iat: u64,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    pub auth_time: u64,
    pub acr: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,

    /// Every claim not named above.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ValidatedClaims {
    /// Looks up a claim that has no dedicated field.
    pub fn extra(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    pub fn has_audience(&self, audience: &str) -> bool {
        self.aud.iter().any(|a| a == audience)
    }
}

/// Accepts `aud` as a single string or an array of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(aud) => vec![aud],
        OneOrMany::Many(auds) => auds,
    })
}

/// Checks a verified payload against `config` at time `now` (Unix seconds).
///
/// The checks run in a fixed order and stop at the first failure: issuer,
/// audience, expiry, not-before/issued-at, then claim presence. A claim one
/// of the earlier checks needs but cannot read is reported as missing.
pub fn validate(payload: Map<String, Value>, config: &Config, now: u64) -> Result<ValidatedClaims, ValidationError> {
    let skew = config.validation.leeway.as_secs();

    let iss = string_claim(&payload, "iss")?;
    if iss != config.issuer {
        return Err(ValidationError::IssuerMismatch(format!(
            "expected issuer {}",
            config.issuer
        )));
    }

    let audiences = audience_claim(&payload)?;
    if !audiences.iter().any(|aud| config.audiences.iter().any(|accepted| accepted == aud)) {
        return Err(ValidationError::AudienceMismatch(
            "no accepted audience in 'aud'".to_string(),
        ));
    }

    let exp = numeric_date(&payload, "exp")?.ok_or_else(|| missing("exp"))?;
    if now > exp.saturating_add(skew) {
        return Err(ValidationError::TokenExpired(format!(
            "expired {}s ago",
            now - exp
        )));
    }

    let latest_acceptable = now.saturating_add(skew);
    for name in ["nbf", "iat"] {
        if let Some(time) = numeric_date(&payload, name)? {
            if time > latest_acceptable {
                return Err(ValidationError::TokenNotYetValid(format!(
                    "'{name}' is {}s in the future",
                    time - now
                )));
            }
        }
    }

    let required = SHAPE_REQUIRED_CLAIMS
        .iter()
        .copied()
        .chain(config.validation.required_claims.iter().map(String::as_str));
    for name in required {
        if payload.get(name).map_or(true, Value::is_null) {
            return Err(missing(name));
        }
    }
    string_claim(&payload, "sub")?;
    string_claim(&payload, "acr")?;
    numeric_date(&payload, "auth_time")?;

    let (payload, misfits) = split_profile(payload);
    let mut claims: ValidatedClaims = serde_json::from_value(Value::Object(payload))
        .map_err(|_| ValidationError::MissingRequiredClaim("claims do not fit the expected shape".to_string()))?;
    claims.extra.extend(misfits);
    Ok(claims)
}

const STRING_PROFILE_CLAIMS: [&str; 6] = [
    "email",
    "name",
    "given_name",
    "family_name",
    "preferred_username",
    "nickname",
];

/// Separates profile claims whose value cannot populate their typed field.
///
/// `email_verified` given as `"true"` or `"false"` and `groups` given as a
/// single string are coerced first.
fn split_profile(mut payload: Map<String, Value>) -> (Map<String, Value>, Vec<(String, Value)>) {
    let verified = match payload.get("email_verified").and_then(Value::as_str) {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    };
    if let Some(verified) = verified {
        payload.insert("email_verified".to_string(), Value::Bool(verified));
    }
    if let Some(Value::String(group)) = payload.get("groups") {
        let groups = Value::Array(vec![Value::String(group.clone())]);
        payload.insert("groups".to_string(), groups);
    }

    let fits = |name: &str, value: &Value| match (name, value) {
        (_, Value::Null) => true,
        ("email_verified", value) => value.is_boolean(),
        ("groups", Value::Array(groups)) => groups.iter().all(Value::is_string),
        ("groups", _) => false,
        (_, value) => value.is_string(),
    };

    let mut misfits = Vec::new();
    for name in STRING_PROFILE_CLAIMS.iter().copied().chain(["email_verified", "groups"]) {
        if payload.get(name).is_some_and(|value| !fits(name, value)) {
            if let Some(value) = payload.remove(name) {
                misfits.push((name.to_string(), value));
            }
        }
    }
    (payload, misfits)
}

fn missing(name: &str) -> ValidationError {
    ValidationError::MissingRequiredClaim(format!("'{name}' is missing or has the wrong type"))
}

fn string_claim<'a>(payload: &'a Map<String, Value>, name: &str) -> Result<&'a str, ValidationError> {
    payload.get(name).and_then(Value::as_str).ok_or_else(|| missing(name))
}

fn audience_claim(payload: &Map<String, Value>) -> Result<Vec<&str>, ValidationError> {
    match payload.get("aud") {
        Some(Value::String(aud)) => Ok(vec![aud.as_str()]),
        Some(Value::Array(auds)) => auds
            .iter()
            .map(|aud| aud.as_str().ok_or_else(|| missing("aud")))
            .collect(),
        _ => Err(missing("aud")),
    }
}

/// Reads an optional NumericDate. Only non-negative integers are accepted.
fn numeric_date(payload: &Map<String, Value>, name: &str) -> Result<Option<u64>, ValidationError> {
    match payload.get(name) {
        None => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| missing(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::error::FailureKind;
    use serde_json::json;
    use std::time::Duration;

    const NOW: u64 = 1_750_000_000;

    fn config() -> Config {
        ConfigBuilder::new()
            .issuer("https://issuer.example.com/")
            .unwrap()
            .audience("my-client-id")
            .audience("other-client")
            .jwks_uri("https://issuer.example.com/jwks")
            .unwrap()
            .leeway(Duration::from_secs(60))
            .build()
            .unwrap()
    }

    fn payload() -> Map<String, Value> {
        match json!({
            "iss": "https://issuer.example.com/",
            "aud": ["my-client-id"],
            "sub": "8a8ef5a2-4c43-4a43-9fe9-3c5b2d6e2a10",
            "iat": 1_700_000_000u64,
            "exp": 1_800_000_000u64,
            "auth_time": 1_700_000_000u64,
            "acr": "urn:mace:incommon:iap:silver",
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn with(name: &str, value: Value) -> Map<String, Value> {
        let mut payload = payload();
        payload.insert(name.to_string(), value);
        payload
    }

    fn without(name: &str) -> Map<String, Value> {
        let mut payload = payload();
        payload.remove(name);
        payload
    }

    fn kind(payload: Map<String, Value>) -> FailureKind {
        validate(payload, &config(), NOW).unwrap_err().kind()
    }

    #[test]
    fn accepts_valid_claims() {
        let claims = validate(payload(), &config(), NOW).unwrap();

        assert_eq!(claims.iss, "https://issuer.example.com/");
        assert_eq!(claims.aud, vec!["my-client-id".to_string()]);
        assert_eq!(claims.auth_time, 1_700_000_000);
        assert_eq!(claims.acr, "urn:mace:incommon:iap:silver");
        assert!(claims.extra.is_empty());
        assert_eq!(serde_json::to_value(&claims).unwrap(), Value::Object(payload()));
    }

    #[test]
    fn profile_fields_and_unknown_claims_are_kept() {
        let mut payload = payload();
        payload.insert("email".into(), json!("alice@example.com"));
        payload.insert("email_verified".into(), json!(true));
        payload.insert("groups".into(), json!(["admins", "staff"]));
        payload.insert("tenant".into(), json!({ "id": 7 }));

        let claims = validate(payload.clone(), &config(), NOW).unwrap();

        assert_eq!(claims.email.as_deref(), Some("alice@example.com"));
        assert_eq!(claims.email_verified, Some(true));
        assert_eq!(claims.groups, Some(vec!["admins".to_string(), "staff".to_string()]));
        assert_eq!(claims.extra("tenant"), Some(&json!({ "id": 7 })));
        assert_eq!(serde_json::to_value(&claims).unwrap(), Value::Object(payload));
    }

    #[test]
    fn string_audience_is_accepted() {
        let claims = validate(with("aud", json!("other-client")), &config(), NOW).unwrap();
        assert!(claims.has_audience("other-client"));
    }

    #[test]
    fn issuer_must_match_exactly() {
        assert_eq!(kind(with("iss", json!("https://issuer.example.com"))), FailureKind::IssuerMismatch);
        assert_eq!(kind(with("iss", json!("https://evil.example.com/"))), FailureKind::IssuerMismatch);
        assert_eq!(kind(without("iss")), FailureKind::MissingRequiredClaim);
    }

    #[test]
    fn audience_must_intersect() {
        assert_eq!(kind(with("aud", json!(["someone-else"]))), FailureKind::AudienceMismatch);
        assert_eq!(kind(with("aud", json!([]))), FailureKind::AudienceMismatch);
        assert_eq!(kind(without("aud")), FailureKind::MissingRequiredClaim);
        assert_eq!(kind(with("aud", json!(42))), FailureKind::MissingRequiredClaim);
    }

    #[test]
    fn expiry_honours_skew_inclusively() {
        let exp = NOW - 60;
        assert!(validate(with("exp", json!(exp)), &config(), NOW).is_ok());
        assert_eq!(kind(with("exp", json!(exp - 1))), FailureKind::TokenExpired);
        assert_eq!(kind(without("exp")), FailureKind::MissingRequiredClaim);
        assert_eq!(kind(with("exp", json!(1.8e9))), FailureKind::MissingRequiredClaim);
    }

    #[test]
    fn future_nbf_and_iat_are_rejected() {
        assert!(validate(with("nbf", json!(NOW + 60)), &config(), NOW).is_ok());
        assert_eq!(kind(with("nbf", json!(NOW + 61))), FailureKind::TokenNotYetValid);
        assert_eq!(kind(with("iat", json!(NOW + 61))), FailureKind::TokenNotYetValid);
    }

    #[test]
    fn checks_run_in_order() {
        // Wrong issuer and expired: the issuer is reported.
        let mut payload = with("iss", json!("https://evil.example.com/"));
        payload.insert("exp".into(), json!(1));
        assert_eq!(kind(payload), FailureKind::IssuerMismatch);

        // Wrong audience and missing acr: the audience is reported.
        let mut payload = with("aud", json!("nobody"));
        payload.remove("acr");
        assert_eq!(kind(payload), FailureKind::AudienceMismatch);
    }

    #[test]
    fn shape_and_configured_claims_are_required() {
        for name in ["sub", "iat", "auth_time", "acr"] {
            let err = validate(without(name), &config(), NOW).unwrap_err();
            assert_eq!(err.kind(), FailureKind::MissingRequiredClaim);
            assert!(err.detail().contains(name), "{err}");
        }
        for (name, value) in [("acr", json!(3)), ("sub", json!(["a"])), ("auth_time", json!("yesterday"))] {
            let err = validate(with(name, value), &config(), NOW).unwrap_err();
            assert_eq!(err.kind(), FailureKind::MissingRequiredClaim);
            assert!(err.detail().contains(name), "{err}");
        }

        let mut config = config();
        config.validation.required_claims = vec!["email".to_string()];
        let err = validate(payload(), &config, NOW).unwrap_err();
        assert_eq!(err, ValidationError::MissingRequiredClaim("'email' is missing or has the wrong type".into()));
    }

    #[test]
    fn loosely_typed_profile_claims_are_coerced() {
        let mut payload = payload();
        payload.insert("email_verified".into(), json!("true"));
        payload.insert("groups".into(), json!("admins"));

        let claims = validate(payload, &config(), NOW).unwrap();

        assert_eq!(claims.email_verified, Some(true));
        assert_eq!(claims.groups, Some(vec!["admins".to_string()]));
        assert!(claims.extra.is_empty());
    }

    #[test]
    fn mistyped_profile_claims_move_to_extra() {
        let mut payload = payload();
        payload.insert("email_verified".into(), json!("yes"));
        payload.insert("groups".into(), json!([1, 2]));
        payload.insert("name".into(), json!({ "first": "Alice" }));
        payload.insert("email".into(), json!("alice@example.com"));

        let claims = validate(payload, &config(), NOW).unwrap();

        assert_eq!(claims.email.as_deref(), Some("alice@example.com"));
        assert_eq!(claims.email_verified, None);
        assert_eq!(claims.groups, None);
        assert_eq!(claims.name, None);
        assert_eq!(claims.extra("email_verified"), Some(&json!("yes")));
        assert_eq!(claims.extra("groups"), Some(&json!([1, 2])));
        assert_eq!(claims.extra("name"), Some(&json!({ "first": "Alice" })));
    }
}
