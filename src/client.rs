// src/client.rs

use crate::error::FetchError;
use crate::model::{parse_key_set, JwksDocument, OidcDiscoveryDocument};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Retrieves the JSON Web Key Set published at a URI.
///
/// The key cache holds one of these and calls it on every refresh.
/// Implementations must be stateless with respect to the keys they return.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    async fn fetch(&self, jwks_uri: &Url) -> Result<JwksDocument, FetchError>;
}

/// A `JwksFetcher` over HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpJwksFetcher {
    http_client: reqwest::Client,
}

impl HttpJwksFetcher {
    /// Creates a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    /// Creates a fetcher around an existing client, e.g. one with custom TLS roots.
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    #[instrument(skip_all, fields(jwks_uri = %jwks_uri), err)]
    async fn fetch(&self, jwks_uri: &Url) -> Result<JwksDocument, FetchError> {
        let response = self
            .http_client
            .get(jwks_uri.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?;

        let max_age = parse_cache_control(&response);
        let body = response.bytes().await?;
        let keys = parse_key_set(&body)?;

        debug!("Fetched {} usable keys, max-age: {:?}", keys.len(), max_age);
        Ok(JwksDocument { keys, max_age })
    }
}

/// Resolves the JWKS URI from the issuer's OIDC discovery document.
///
/// The document's `issuer` must equal `issuer` exactly.
#[instrument(skip(http_client), err)]
pub async fn discover_jwks_uri(http_client: &reqwest::Client, issuer: &str) -> Result<Url, FetchError> {
    let discovery_url = format!("{}/.well-known/openid-configuration", issuer.trim_end_matches('/'));

    debug!("Performing OIDC discovery at: {}", discovery_url);
    let discovery_doc: OidcDiscoveryDocument = http_client
        .get(&discovery_url)
        .header(ACCEPT, "application/json")
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    if discovery_doc.issuer != issuer {
        return Err(FetchError::IssuerMismatch {
            expected: issuer.to_string(),
            found: discovery_doc.issuer,
        });
    }

    let jwks_uri = Url::parse(&discovery_doc.jwks_uri).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
    debug!("Discovered JWKS URI: {}", jwks_uri);
    Ok(jwks_uri)
}

/// Parses the `Cache-Control` header to determine the TTL.
fn parse_cache_control(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(CACHE_CONTROL)?
        .to_str()
        .ok()?
        .split(',')
        .find_map(|part| {
            part.trim()
                .strip_prefix("max-age=")?
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        })
}
