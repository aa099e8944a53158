//! Identity provider boundary for the OAuth2 flow.
//!
//! # Purpose
//! [`IdentityProvider`] hides the provider protocol behind the four calls the
//! authenticator needs: build the authorization URL, exchange a code, refresh
//! a token and verify an access token into an [`Identity`].
//!
//! # OIDC provider
//! [`OidcProvider`] resolves endpoints from
//! `{issuer}/.well-known/openid-configuration`, caching the document with a TTL.
//! Access tokens are verified against the userinfo endpoint; username and
//! groups come from configurable claims.
//!
//! # Error policy
//! - 401/403 from userinfo, and 400/401/403 from the token endpoint, are
//!   [`ProviderError::Rejected`]: the credential is bad and a refresh may help.
//! - Everything else (transport errors, timeouts, 5xx) is an upstream failure.
//! - Every call is bounded by the configured timeout.
use crate::reload::config::{ClaimMappings, OAuth2Config};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use warden_authz::Identity;

const DISCOVERY_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("identity provider rejected the credential")]
    Rejected,
    #[error("identity provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("identity provider returned {status} from {endpoint}")]
    Status { endpoint: String, status: StatusCode },
    #[error("identity provider call timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid identity provider response: {0}")]
    InvalidResponse(String),
    #[error("identity provider metadata unavailable: {0}")]
    Metadata(String),
}

impl ProviderError {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ProviderError::Rejected)
    }
}

/// Tokens returned by a code exchange or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Stable provider name, exposed to the browser in the indicator cookie.
    fn name(&self) -> &str;

    async fn authorization_url(&self, state: &str, code_challenge: &str)
    -> Result<String, ProviderError>;

    async fn exchange_code(&self, code: &str, code_verifier: &str)
    -> Result<TokenSet, ProviderError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError>;

    async fn verify(&self, access_token: &str) -> Result<Identity, ProviderError>;

    /// Warm any metadata caches. Called in the background when a generation
    /// starts.
    async fn prefetch(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Builds the provider for an OAuth2 generation.
pub trait ProviderFactory: Send + Sync {
    fn build(
        &self,
        config: &OAuth2Config,
        timeout: Duration,
    ) -> Result<Arc<dyn IdentityProvider>, ProviderError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OidcProviderFactory;

impl ProviderFactory for OidcProviderFactory {
    fn build(
        &self,
        config: &OAuth2Config,
        timeout: Duration,
    ) -> Result<Arc<dyn IdentityProvider>, ProviderError> {
        Ok(Arc::new(OidcProvider::new(config, timeout)?))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderMetadata {
    authorization_endpoint: String,
    token_endpoint: String,
    #[serde(default)]
    userinfo_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedDiscovery {
    metadata: ProviderMetadata,
    expires_at: Instant,
}

pub struct OidcProvider {
    http: reqwest::Client,
    discovery_url: String,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    scopes: Vec<String>,
    claims: ClaimMappings,
    timeout: Duration,
    discovery: RwLock<Option<CachedDiscovery>>,
}

impl OidcProvider {
    pub fn new(config: &OAuth2Config, timeout: Duration) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            discovery_url: format!(
                "{}/.well-known/openid-configuration",
                config.issuer_url.trim_end_matches('/')
            ),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_url: config.redirect_url.clone(),
            scopes: config.scopes.clone(),
            claims: config.claims.clone(),
            timeout,
            discovery: RwLock::new(None),
        })
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
    }

    async fn metadata(&self) -> Result<ProviderMetadata, ProviderError> {
        if let Some(entry) = self.discovery.read().as_ref()
            && entry.expires_at > Instant::now()
        {
            return Ok(entry.metadata.clone());
        }

        let metadata: ProviderMetadata = self
            .bounded(async {
                let response = self.http.get(&self.discovery_url).send().await?;
                if !response.status().is_success() {
                    return Err(ProviderError::Metadata(format!(
                        "{} returned {}",
                        self.discovery_url,
                        response.status()
                    )));
                }
                response
                    .json()
                    .await
                    .map_err(|err| ProviderError::Metadata(err.to_string()))
            })
            .await?;
        *self.discovery.write() = Some(CachedDiscovery {
            metadata: metadata.clone(),
            expires_at: Instant::now() + DISCOVERY_TTL,
        });
        tracing::debug!(url = %self.discovery_url, "oidc discovery cached");
        Ok(metadata)
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, ProviderError> {
        let metadata = self.metadata().await?;
        self.bounded(async {
            let response = self
                .http
                .post(&metadata.token_endpoint)
                .form(form)
                .send()
                .await?;
            match response.status() {
                status if status.is_success() => response
                    .json::<TokenSet>()
                    .await
                    .map_err(|err| ProviderError::InvalidResponse(err.to_string())),
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    Err(ProviderError::Rejected)
                }
                status => Err(ProviderError::Status {
                    endpoint: metadata.token_endpoint.clone(),
                    status,
                }),
            }
        })
        .await
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn name(&self) -> &str {
        "oidc"
    }

    async fn authorization_url(
        &self,
        state: &str,
        code_challenge: &str,
    ) -> Result<String, ProviderError> {
        let metadata = self.metadata().await?;
        let mut url = url::Url::parse(&metadata.authorization_endpoint)
            .map_err(|err| ProviderError::Metadata(format!("authorization_endpoint: {err}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenSet, ProviderError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.redirect_url),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("code_verifier", code_verifier),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ])
        .await
    }

    async fn verify(&self, access_token: &str) -> Result<Identity, ProviderError> {
        let metadata = self.metadata().await?;
        let endpoint = metadata
            .userinfo_endpoint
            .ok_or_else(|| ProviderError::Metadata("userinfo_endpoint missing".to_string()))?;
        let claims: Value = self
            .bounded(async {
                let response = self.http.get(&endpoint).bearer_auth(access_token).send().await?;
                match response.status() {
                    status if status.is_success() => response
                        .json()
                        .await
                        .map_err(|err| ProviderError::InvalidResponse(err.to_string())),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        Err(ProviderError::Rejected)
                    }
                    status => Err(ProviderError::Status {
                        endpoint: endpoint.clone(),
                        status,
                    }),
                }
            })
            .await?;
        identity_from_claims(&claims, &self.claims)
    }

    async fn prefetch(&self) -> Result<(), ProviderError> {
        self.metadata().await.map(|_| ())
    }
}

/// Map userinfo claims onto an [`Identity`].
pub fn identity_from_claims(
    claims: &Value,
    mappings: &ClaimMappings,
) -> Result<Identity, ProviderError> {
    let name = claims
        .get(&mappings.username)
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            ProviderError::InvalidResponse(format!("claim {:?} missing", mappings.username))
        })?;
    Ok(Identity::new(name, extract_groups(claims, &mappings.groups)))
}

fn extract_groups(claims: &Value, name: &str) -> Vec<String> {
    // Groups may be encoded as either a string or array of strings.
    match claims.get(name) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(value)) => vec![value.clone()],
        _ => Vec::new(),
    }
}
