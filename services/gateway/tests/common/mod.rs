#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;
use axum_extra::extract::cookie::Cookie;
use gateway::oauth2::cookies::CookieSettings;
use gateway::oauth2::pkce::challenge_for;
use gateway::oauth2::provider::{IdentityProvider, ProviderError, ProviderFactory, TokenSet};
use gateway::reload::config::{
    AuthenticationKind, ConfigGeneration, OAuth2Config, RuntimeConfig,
};
use gateway::reload::generation::GenerationDeps;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tower::ServiceExt;
use warden_authz::Identity;
use warden_authz::fixture::FakeCluster;

pub const CLIENT_SECRET: &str = "integration-secret";
pub const AUTHORIZE_ENDPOINT: &str = "https://idp.test/authorize";

pub async fn read_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

/// Identity provider double: codes, access tokens and refresh tokens are
/// registered up front; every exchange checks the PKCE verifier against a
/// challenge the provider actually issued.
#[derive(Default)]
pub struct FakeProvider {
    challenges: Mutex<HashSet<String>>,
    codes: Mutex<HashMap<String, TokenSet>>,
    users: Mutex<HashMap<String, Identity>>,
    refreshes: Mutex<HashMap<String, TokenSet>>,
    unavailable: AtomicBool,
    exchanges: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register_code(&self, code: &str, access_token: &str, refresh_token: Option<&str>) {
        self.codes.lock().insert(
            code.to_string(),
            TokenSet {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.map(str::to_string),
            },
        );
    }

    pub fn register_user(&self, access_token: &str, identity: Identity) {
        self.users.lock().insert(access_token.to_string(), identity);
    }

    pub fn register_refresh(&self, refresh_token: &str, access_token: &str, rotated: Option<&str>) {
        self.refreshes.lock().insert(
            refresh_token.to_string(),
            TokenSet {
                access_token: access_token.to_string(),
                refresh_token: rotated.map(str::to_string),
            },
        );
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), ProviderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::Status {
                endpoint: "https://idp.test".to_string(),
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn authorization_url(
        &self,
        state: &str,
        code_challenge: &str,
    ) -> Result<String, ProviderError> {
        self.check_available()?;
        self.challenges.lock().insert(code_challenge.to_string());
        let mut url = url::Url::parse(AUTHORIZE_ENDPOINT).expect("url");
        url.query_pairs_mut()
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge);
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenSet, ProviderError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if !self.challenges.lock().contains(&challenge_for(code_verifier)) {
            return Err(ProviderError::Rejected);
        }
        self.codes
            .lock()
            .remove(code)
            .ok_or(ProviderError::Rejected)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.refreshes
            .lock()
            .get(refresh_token)
            .cloned()
            .ok_or(ProviderError::Rejected)
    }

    async fn verify(&self, access_token: &str) -> Result<Identity, ProviderError> {
        self.check_available()?;
        self.users
            .lock()
            .get(access_token)
            .cloned()
            .ok_or(ProviderError::Rejected)
    }
}

pub struct FakeProviderFactory(pub Arc<FakeProvider>);

impl ProviderFactory for FakeProviderFactory {
    fn build(
        &self,
        _config: &OAuth2Config,
        _timeout: Duration,
    ) -> Result<Arc<dyn IdentityProvider>, ProviderError> {
        Ok(self.0.clone())
    }
}

pub fn deps(cluster: &FakeCluster, provider: &Arc<FakeProvider>) -> GenerationDeps {
    GenerationDeps {
        client_factory: cluster.factory(),
        provider_factory: Arc::new(FakeProviderFactory(Arc::clone(provider))),
        cookies: CookieSettings::insecure(),
        request_timeout: Duration::from_secs(1),
    }
}

pub fn no_auth_config(version: &str) -> ConfigGeneration {
    ConfigGeneration::new(version, RuntimeConfig::default()).expect("config")
}

pub fn oauth2_config(version: &str) -> ConfigGeneration {
    let mut config = RuntimeConfig::default();
    config.authentication.kind = AuthenticationKind::OAuth2;
    config.authentication.oauth2 = Some(OAuth2Config {
        provider: "oidc".to_string(),
        issuer_url: "https://idp.test".to_string(),
        client_id: "warden".to_string(),
        client_secret: CLIENT_SECRET.to_string(),
        redirect_url: "http://warden.test/oauth2/callback".to_string(),
        scopes: vec!["openid".to_string(), "groups".to_string()],
        claims: Default::default(),
    });
    ConfigGeneration::new(version, config).expect("config")
}

pub async fn get(router: &Router, uri: &str, cookies: &[(&str, &str)]) -> Response {
    let mut request = Request::get(uri);
    if !cookies.is_empty() {
        let header_value = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        request = request.header(header::COOKIE, header_value);
    }
    router
        .clone()
        .oneshot(request.body(Body::empty()).expect("request"))
        .await
        .expect("response")
}

pub fn set_cookies(response: &Response) -> Vec<Cookie<'static>> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| Cookie::parse(value.to_string()).ok())
        .collect()
}

pub fn set_cookie(response: &Response, name: &str) -> Option<Cookie<'static>> {
    set_cookies(response)
        .into_iter()
        .find(|cookie| cookie.name() == name)
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .expect("location header")
        .to_string()
}

pub fn query_param(url: &str, key: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}
