// src/settings.rs

use crate::config::{Config, ConfigBuilder};
use crate::error::ConfigError;
use crate::validator::TokenValidator;
use config::{Environment, File};
use jsonwebtoken::Algorithm;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Prefix of every environment variable read by [`ValidatorSettings::from_env`].
pub const ENV_PREFIX: &str = "TOKEN_VALIDATOR";

const OIDC_SCOPE: &str = "TOKEN_VALIDATOR_OIDC_";
const STATIC_KEY_SCOPE: &str = "TOKEN_VALIDATOR_STATIC_KEY_";

/// Which validator a deployment runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    /// Keys come from the issuer's JWKS, configured or discovered.
    #[default]
    #[serde(alias = "OIDC")]
    Oidc,
    /// A single key is configured directly.
    #[serde(alias = "STATIC_KEY", alias = "static")]
    StaticKey,
}

/// Validator settings as read from a file and the environment.
///
/// Environment variables take precedence over the file. Each field is read
/// from the variable scoped to the selected type, `TOKEN_VALIDATOR_OIDC_<FIELD>`
/// or `TOKEN_VALIDATOR_STATIC_KEY_<FIELD>`, falling back to the unscoped
/// `TOKEN_VALIDATOR_<FIELD>`. Variables scoped to the other type are ignored.
/// List fields accept a JSON array (`["RS256","ES256"]`) or comma-separated
/// values.
///
/// An issuer given as a bare origin gets a trailing `/`, so
/// `https://issuer.example.com` and `https://issuer.example.com/` configure
/// the same issuer.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ValidatorSettings {
    #[serde(rename = "type", default)]
    pub kind: ValidatorKind,
    pub issuer: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub audience: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub algorithms: Vec<String>,
    pub clock_skew_secs: Option<u64>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub required_claims: Vec<String>,

    pub jwks_uri: Option<String>,
    pub cache_ttl_secs: Option<u64>,
    pub max_stale_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,

    pub shared_secret: Option<String>,
    pub public_key_pem: Option<String>,
}

impl fmt::Debug for ValidatorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorSettings")
            .field("kind", &self.kind)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("algorithms", &self.algorithms)
            .field("clock_skew_secs", &self.clock_skew_secs)
            .field("required_claims", &self.required_claims)
            .field("jwks_uri", &self.jwks_uri)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("max_stale_secs", &self.max_stale_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "<redacted>"))
            .field("public_key_pem", &self.public_key_pem.is_some())
            .finish()
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) if value.trim_start().starts_with('[') => {
            let values: Vec<Value> = serde_json::from_str(&value).map_err(D::Error::custom)?;
            values.into_iter().map(list_item).collect::<Result<_, _>>().map_err(D::Error::custom)
        }
        Value::String(value) => Ok(value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .collect()),
        Value::Array(values) => values.into_iter().map(list_item).collect::<Result<_, _>>().map_err(D::Error::custom),
        Value::Null => Ok(Vec::new()),
        other => list_item(other).map(|item| vec![item]).map_err(D::Error::custom),
    }
}

fn list_item(value: Value) -> Result<String, String> {
    match value {
        Value::String(item) => Ok(item),
        Value::Number(item) => Ok(item.to_string()),
        other => Err(format!("expected a string, found {other}")),
    }
}

/// Appends `/` to an issuer that is a bare origin. Anything else is kept.
fn normalize_issuer(issuer: String) -> String {
    match Url::parse(&issuer) {
        Ok(url) if url.path() == "/" && url.query().is_none() && !issuer.ends_with('/') => url.to_string(),
        _ => issuer,
    }
}

/// Moves variables scoped to `kind` onto their unscoped names and drops
/// those scoped to the other kind.
fn unscope(vars: HashMap<String, String>, kind: ValidatorKind) -> HashMap<String, String> {
    let (selected, other) = match kind {
        ValidatorKind::Oidc => (OIDC_SCOPE, STATIC_KEY_SCOPE),
        ValidatorKind::StaticKey => (STATIC_KEY_SCOPE, OIDC_SCOPE),
    };

    let mut scoped = Vec::new();
    let mut flat = HashMap::with_capacity(vars.len());
    for (key, value) in vars {
        if let Some(field) = key.strip_prefix(selected) {
            scoped.push((format!("{ENV_PREFIX}_{}", field.trim_start_matches('_')), value));
        } else if !key.starts_with(other) {
            flat.insert(key, value);
        }
    }
    flat.extend(scoped);
    flat
}

fn environment(vars: HashMap<String, String>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .source(Some(vars))
}

impl ValidatorSettings {
    /// Loads settings from `TOKEN_VALIDATOR_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None, None)
    }

    /// Loads settings from an optional file, overridden by the environment.
    ///
    /// The file format follows its extension (YAML, TOML or JSON); a missing
    /// file is not an error. When `vars` is given it replaces the process
    /// environment.
    pub fn load(file: Option<&Path>, vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let vars = vars.unwrap_or_else(|| {
            std::env::vars()
                .filter(|(key, _)| key.starts_with(ENV_PREFIX))
                .collect()
        });

        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }

        // The type picks which scoped variables apply, so it is resolved first.
        let kind = match builder
            .clone()
            .add_source(environment(vars.clone()))
            .build()?
            .get::<ValidatorKind>("type")
        {
            Ok(kind) => kind,
            Err(config::ConfigError::NotFound(_)) => ValidatorKind::default(),
            Err(e) => return Err(e.into()),
        };

        let mut settings: Self = builder
            .add_source(environment(unscope(vars, kind)))
            .build()?
            .try_deserialize()?;
        settings.issuer = normalize_issuer(settings.issuer);
        Ok(settings)
    }

    /// Resolves the settings into an issuer configuration.
    ///
    /// For `oidc` without a `jwks_uri`, the JWKS URI is discovered from the
    /// issuer's `.well-known/openid-configuration`.
    pub async fn into_config(self) -> Result<Config, ConfigError> {
        let builder = self.builder()?;
        match self.kind {
            ValidatorKind::Oidc => builder.build_with_discovery().await,
            ValidatorKind::StaticKey => builder.build(),
        }
    }

    /// Resolves the settings into a ready validator.
    pub async fn into_validator(self) -> Result<TokenValidator, ConfigError> {
        TokenValidator::new(self.into_config().await?)
    }

    fn builder(&self) -> Result<ConfigBuilder, ConfigError> {
        let mut builder = ConfigBuilder::new()
            .issuer(&self.issuer)?
            .audiences(self.audience.iter().cloned())
            .required_claims(self.required_claims.iter().cloned());

        if let Some(skew) = self.clock_skew_secs {
            builder = builder.leeway(Duration::from_secs(skew));
        }
        if let Some(ttl) = self.cache_ttl_secs {
            builder = builder.cache_ttl(Duration::from_secs(ttl));
        }
        if let Some(max_stale) = self.max_stale_secs {
            builder = builder.max_stale(Duration::from_secs(max_stale));
        }
        if let Some(timeout) = self.fetch_timeout_secs {
            builder = builder.fetch_timeout(Duration::from_secs(timeout));
        }

        if !self.algorithms.is_empty() {
            let algorithms = self
                .algorithms
                .iter()
                .map(|alg| {
                    Algorithm::from_str(alg)
                        .map_err(|_| ConfigError::InvalidConfiguration(format!("unknown algorithm '{alg}'")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            builder = builder.algorithms(algorithms);
        }

        match self.kind {
            ValidatorKind::Oidc => {
                if self.shared_secret.is_some() || self.public_key_pem.is_some() {
                    return Err(ConfigError::InvalidConfiguration(
                        "shared_secret and public_key_pem require type static_key".to_string(),
                    ));
                }
                if let Some(jwks_uri) = &self.jwks_uri {
                    builder = builder.jwks_uri(jwks_uri)?;
                }
            }
            ValidatorKind::StaticKey => {
                if self.jwks_uri.is_some() {
                    return Err(ConfigError::AmbiguousKeySource(
                        "jwks_uri cannot be used with type static_key".to_string(),
                    ));
                }
                builder = match (&self.shared_secret, &self.public_key_pem) {
                    (Some(_), Some(_)) => {
                        return Err(ConfigError::AmbiguousKeySource(
                            "set either shared_secret or public_key_pem, not both".to_string(),
                        ));
                    }
                    (Some(secret), None) => {
                        let builder = builder.shared_secret(secret.as_bytes().to_vec())?;
                        if self.algorithms.is_empty() {
                            builder.algorithms(vec![Algorithm::HS256])
                        } else {
                            builder
                        }
                    }
                    (None, Some(pem)) => builder.public_key_pem(pem.as_str())?,
                    (None, None) => {
                        return Err(ConfigError::MissingConfiguration(
                            "shared_secret or public_key_pem".to_string(),
                        ));
                    }
                };
            }
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeySourceConfig, StaticKey};
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[tokio::test]
    async fn loads_oidc_settings_from_environment() {
        let settings = ValidatorSettings::load(
            None,
            vars(&[
                ("TOKEN_VALIDATOR_TYPE", "oidc"),
                ("TOKEN_VALIDATOR_ISSUER", "https://issuer.example.com/"),
                ("TOKEN_VALIDATOR_JWKS_URI", "https://issuer.example.com/jwks"),
                ("TOKEN_VALIDATOR_AUDIENCE", "my-client-id,other-client"),
                ("TOKEN_VALIDATOR_ALGORITHMS", "RS256,ES256"),
                ("TOKEN_VALIDATOR_CLOCK_SKEW_SECS", "30"),
                ("TOKEN_VALIDATOR_CACHE_TTL_SECS", "120"),
                ("UNRELATED_ISSUER", "https://ignored.example.com/"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.kind, ValidatorKind::Oidc);
        assert_eq!(settings.audience, vec!["my-client-id", "other-client"]);
        assert_eq!(settings.clock_skew_secs, Some(30));

        let config = settings.into_config().await.unwrap();
        assert_eq!(config.issuer, "https://issuer.example.com/");
        assert_eq!(config.audiences, vec!["my-client-id", "other-client"]);
        assert_eq!(config.validation.algorithms, vec![Algorithm::RS256, Algorithm::ES256]);
        assert_eq!(config.validation.leeway, Duration::from_secs(30));
        match config.key_source {
            KeySourceConfig::Jwks { jwks_uri, cache } => {
                assert_eq!(jwks_uri.as_str(), "https://issuer.example.com/jwks");
                assert_eq!(cache.ttl, Duration::from_secs(120));
            }
            KeySourceConfig::Static(_) => panic!("expected a JWKS key source"),
        }
    }

    #[tokio::test]
    async fn reads_variant_scoped_variables() {
        let settings = ValidatorSettings::load(
            None,
            vars(&[
                ("TOKEN_VALIDATOR_TYPE", "OIDC"),
                ("TOKEN_VALIDATOR_OIDC_ISSUER", "https://issuer.example.com"),
                ("TOKEN_VALIDATOR_OIDC_JWKS_URI", "https://issuer.example.com/jwks"),
                ("TOKEN_VALIDATOR_OIDC_AUDIENCE", "my-client-id"),
                ("TOKEN_VALIDATOR_OIDC_ALGORITHMS", r#"["RS256","ES256"]"#),
            ]),
        )
        .unwrap();

        assert_eq!(settings.kind, ValidatorKind::Oidc);
        assert_eq!(settings.issuer, "https://issuer.example.com/");
        assert_eq!(settings.jwks_uri.as_deref(), Some("https://issuer.example.com/jwks"));
        assert_eq!(settings.audience, vec!["my-client-id"]);
        assert_eq!(settings.algorithms, vec!["RS256", "ES256"]);

        let config = settings.into_config().await.unwrap();
        assert_eq!(config.issuer, "https://issuer.example.com/");
        assert_eq!(config.validation.algorithms, vec![Algorithm::RS256, Algorithm::ES256]);
    }

    #[test]
    fn scoped_variables_win_and_other_scope_is_ignored() {
        let settings = ValidatorSettings::load(
            None,
            vars(&[
                ("TOKEN_VALIDATOR_TYPE", "STATIC_KEY"),
                ("TOKEN_VALIDATOR_ISSUER", "https://flat.example.com/"),
                ("TOKEN_VALIDATOR_AUDIENCE", "api"),
                ("TOKEN_VALIDATOR_STATIC_KEY_ISSUER", "https://scoped.example.com/"),
                ("TOKEN_VALIDATOR_STATIC_KEY_SHARED_SECRET", "s3cret"),
                ("TOKEN_VALIDATOR_OIDC_JWKS_URI", "https://issuer.example.com/jwks"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.kind, ValidatorKind::StaticKey);
        assert_eq!(settings.issuer, "https://scoped.example.com/");
        assert_eq!(settings.shared_secret.as_deref(), Some("s3cret"));
        assert_eq!(settings.jwks_uri, None);
    }

    #[test]
    fn issuer_with_a_path_is_kept_verbatim() {
        let settings = load_with(&[("TOKEN_VALIDATOR_ISSUER", "https://login.example.com/tenant")]);
        assert_eq!(settings.issuer, "https://login.example.com/tenant");
    }

    #[test]
    fn list_values_accept_json_numbers_and_commas() {
        let settings = load_with(&[
            ("TOKEN_VALIDATOR_AUDIENCE", "123456"),
            ("TOKEN_VALIDATOR_REQUIRED_CLAIMS", " email , groups ,"),
        ]);
        assert_eq!(settings.audience, vec!["123456"]);
        assert_eq!(settings.required_claims, vec!["email", "groups"]);

        let err = ValidatorSettings::load(
            None,
            vars(&[
                ("TOKEN_VALIDATOR_ISSUER", "https://issuer.example.com/"),
                ("TOKEN_VALIDATOR_ALGORITHMS", r#"["RS256","#),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Settings(_)));
    }

    #[tokio::test]
    async fn environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "type: static_key\nissuer: https://file.example.com/\naudience: api\nshared_secret: from-file"
        )
        .unwrap();

        let settings = ValidatorSettings::load(
            Some(file.path()),
            vars(&[("TOKEN_VALIDATOR_ISSUER", "https://env.example.com/")]),
        )
        .unwrap();

        assert_eq!(settings.kind, ValidatorKind::StaticKey);
        assert_eq!(settings.issuer, "https://env.example.com/");
        assert_eq!(settings.audience, vec!["api"]);

        let config = settings.into_config().await.unwrap();
        assert_eq!(config.validation.algorithms, vec![Algorithm::HS256]);
        assert!(matches!(
            config.key_source,
            KeySourceConfig::Static(StaticKey::SharedSecret(ref secret)) if secret == b"from-file"
        ));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let settings = ValidatorSettings::load(
            Some(Path::new("/nonexistent/validator.toml")),
            vars(&[
                ("TOKEN_VALIDATOR_ISSUER", "https://issuer.example.com/"),
                ("TOKEN_VALIDATOR_AUDIENCE", "api"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.kind, ValidatorKind::Oidc);
    }

    #[test]
    fn missing_issuer_is_a_settings_error() {
        let err = ValidatorSettings::load(None, vars(&[("TOKEN_VALIDATOR_AUDIENCE", "api")])).unwrap_err();
        assert!(matches!(err, ConfigError::Settings(_)));
    }

    fn load_with(extra: &[(&str, &str)]) -> ValidatorSettings {
        let mut pairs = vec![
            ("TOKEN_VALIDATOR_ISSUER", "https://issuer.example.com/"),
            ("TOKEN_VALIDATOR_AUDIENCE", "api"),
        ];
        pairs.extend_from_slice(extra);
        ValidatorSettings::load(None, vars(&pairs)).unwrap()
    }

    #[tokio::test]
    async fn rejects_inconsistent_settings() {
        let err = load_with(&[("TOKEN_VALIDATOR_TYPE", "static_key")])
            .into_config()
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingConfiguration(_)));

        let err = load_with(&[
            ("TOKEN_VALIDATOR_TYPE", "STATIC_KEY"),
            ("TOKEN_VALIDATOR_SHARED_SECRET", "s"),
            ("TOKEN_VALIDATOR_JWKS_URI", "https://issuer.example.com/jwks"),
        ])
        .into_config()
        .await
        .unwrap_err();
        assert!(matches!(err, ConfigError::AmbiguousKeySource(_)));

        let err = load_with(&[
            ("TOKEN_VALIDATOR_JWKS_URI", "https://issuer.example.com/jwks"),
            ("TOKEN_VALIDATOR_SHARED_SECRET", "s"),
        ])
        .into_config()
        .await
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfiguration(_)));

        let err = load_with(&[
            ("TOKEN_VALIDATOR_JWKS_URI", "https://issuer.example.com/jwks"),
            ("TOKEN_VALIDATOR_ALGORITHMS", "RS256,XX999"),
        ])
        .into_config()
        .await
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfiguration(_)));
    }

    #[test]
    fn debug_redacts_secret() {
        let settings = ValidatorSettings::load(
            None,
            vars(&[
                ("TOKEN_VALIDATOR_ISSUER", "https://issuer.example.com/"),
                ("TOKEN_VALIDATOR_SHARED_SECRET", "hunter2"),
            ]),
        )
        .unwrap();
        assert!(!format!("{settings:?}").contains("hunter2"));
    }
}
