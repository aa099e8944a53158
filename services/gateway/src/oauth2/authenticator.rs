//! OAuth2 authenticator: the browser login state machine.
//!
//! # Purpose
//! Drives `Unauthenticated -> AuthorizationRequested -> CallbackPending ->
//! SessionEstablished`, plus the refresh path taken when an established
//! session's access token is rejected.
//!
//! # Key invariants
//! - No server-side session storage. Login state travels sealed in both the
//!   state cookie and the `state` query parameter; credentials travel sealed
//!   in the session cookie.
//! - At callback the `state` parameter must byte-match the state cookie, and a
//!   missing cookie means the login expired. Both are checked before any
//!   provider call.
//! - A refresh is attempted only when the provider rejects the access token,
//!   never on transport errors.
//! - Provider failures during authorize or callback end in a redirect with an
//!   error cookie, never a hang or a bare 5xx.
//!
//! # Lifecycle
//! [`Authenticator::start`] spawns a background discovery prefetch;
//! [`Authenticator::stop`] cancels it and waits for it under the deadline.
use crate::api::error::{ApiError, api_internal_message, api_unauthorized, api_validation_error};
use crate::oauth2::codec::{CodecError, StateCodec};
use crate::oauth2::cookies::{CookieSettings, SESSION_COOKIE, STATE_COOKIE, STATE_TTL_SECS};
use crate::oauth2::pkce::{PkcePair, random_token};
use crate::oauth2::provider::{IdentityProvider, ProviderError};
use crate::oauth2::state::{LoginState, SessionAuthStorage};
use crate::reload::lifecycle::{Lifecycle, LifecycleError};
use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::form_urlencoded;
use warden_authz::Identity;

const ORIGINAL_PATH_PARAM: &str = "originalPath";
const PREFETCH_RETRY: Duration = Duration::from_secs(5);

/// Failures of `/oauth2/callback`.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("missing state parameter")]
    MissingState,
    #[error("state parameter does not match the login cookie")]
    StateMismatch,
    #[error("login state expired")]
    LoginExpired,
    #[error("malformed login state: {0}")]
    MalformedState(#[source] CodecError),
    #[error("identity provider returned {code}: {description}")]
    ProviderDenied { code: String, description: String },
    #[error("missing authorization code")]
    MissingCode,
    #[error("token exchange failed: {0}")]
    Exchange(#[source] ProviderError),
    #[error("token verification failed: {0}")]
    Verification(#[source] ProviderError),
    #[error("failed to seal session: {0}")]
    Session(#[source] CodecError),
}

impl CallbackError {
    pub fn code(&self) -> &'static str {
        match self {
            CallbackError::MissingState => "missing_state",
            CallbackError::StateMismatch => "state_mismatch",
            CallbackError::LoginExpired => "login_expired",
            CallbackError::MalformedState(_) => "invalid_state",
            CallbackError::ProviderDenied { .. } => "access_denied",
            CallbackError::MissingCode => "missing_code",
            CallbackError::Exchange(_) => "token_exchange_failed",
            CallbackError::Verification(_) => "token_verification_failed",
            CallbackError::Session(_) => "session_error",
        }
    }

    /// `None` for failures that redirect back to the original page.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CallbackError::MissingState
            | CallbackError::StateMismatch
            | CallbackError::MalformedState(_) => Some(StatusCode::BAD_REQUEST),
            CallbackError::LoginExpired => Some(StatusCode::UNAUTHORIZED),
            _ => None,
        }
    }
}

/// Failures authenticating an established session.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no session")]
    NoSession,
    #[error("invalid session: {0}")]
    InvalidSession(#[source] CodecError),
    #[error("session credentials rejected")]
    Rejected,
    #[error("identity provider unavailable: {0}")]
    Provider(#[source] ProviderError),
}

impl AuthError {
    pub fn to_api_error(&self) -> ApiError {
        match self {
            AuthError::Provider(_) => api_internal_message("identity provider unavailable"),
            _ => api_unauthorized("authentication required"),
        }
    }
}

/// Query parameters delivered to `/oauth2/callback`.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// A verified session, with a replacement session cookie when the access
/// token had to be refreshed.
#[derive(Debug)]
pub struct Authenticated {
    pub identity: Identity,
    pub renewed: Option<Cookie<'static>>,
}

pub struct Authenticator {
    provider: Arc<dyn IdentityProvider>,
    codec: StateCodec,
    cookies: CookieSettings,
    cancel: CancellationToken,
    prefetch: Mutex<Option<JoinHandle<()>>>,
}

impl Authenticator {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        codec: StateCodec,
        cookies: CookieSettings,
    ) -> Self {
        Self {
            provider,
            codec,
            cookies,
            cancel: CancellationToken::new(),
            prefetch: Mutex::new(None),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn cookies(&self) -> &CookieSettings {
        &self.cookies
    }

    /// Begin a login: seal fresh login state and redirect to the provider.
    pub async fn authorize(&self, jar: CookieJar, original_query: Option<&str>) -> Response {
        let original_query = original_query.unwrap_or_default();
        match self.begin(original_query).await {
            Ok((location, token)) => {
                tracing::debug!(
                    provider = self.provider.name(),
                    "redirecting to identity provider"
                );
                (jar.add(self.cookies.state(token)), Redirect::to(&location)).into_response()
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to start oauth2 login");
                metrics::counter!("warden_oauth2_logins_total", "result" => "provider_error")
                    .increment(1);
                let unavailable =
                    self.cookies.error("provider_unavailable", "identity provider unavailable");
                let jar = jar
                    .add(unavailable)
                    .add(self.cookies.provider(self.provider.name(), false));
                (jar, Redirect::to(&redirect_target(original_query))).into_response()
            }
        }
    }

    async fn begin(&self, original_query: &str) -> Result<(String, String), ProviderError> {
        let pkce = PkcePair::generate();
        let state = LoginState {
            pkce_verifier: pkce.verifier,
            csrf_token: random_token(16),
            original_query: original_query.to_string(),
            expires_at: chrono::Utc::now().timestamp() + STATE_TTL_SECS,
        };
        let token = self
            .codec
            .encode_login(&state)
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
        let location = self.provider.authorization_url(&token, &pkce.challenge).await?;
        Ok((location, token))
    }

    /// Complete a login.
    pub async fn callback(&self, jar: CookieJar, query: CallbackQuery) -> Response {
        let login = match self.recover_login(&jar, &query) {
            Ok(login) => login,
            Err(err) => {
                tracing::info!(error = %err, "rejected oauth2 callback");
                metrics::counter!("warden_oauth2_logins_total", "result" => err.code())
                    .increment(1);
                let status = err.status().unwrap_or(StatusCode::BAD_REQUEST);
                let body = if status == StatusCode::UNAUTHORIZED {
                    api_unauthorized(&err.to_string())
                } else {
                    api_validation_error(&err.to_string())
                };
                let jar = jar
                    .add(self.cookies.error(err.code(), &err.to_string()))
                    .add(self.cookies.clear_state());
                return (jar, body).into_response();
            }
        };

        let target = redirect_target(&login.original_query);
        let jar = jar.add(self.cookies.clear_state());
        match self.establish(&login, query).await {
            Ok((identity, session)) => {
                tracing::info!(
                    identity = %identity,
                    provider = self.provider.name(),
                    "oauth2 login completed"
                );
                metrics::counter!("warden_oauth2_logins_total", "result" => "success").increment(1);
                let jar = jar
                    .add(self.cookies.session(session))
                    .add(self.cookies.provider(self.provider.name(), true))
                    .add(self.cookies.clear_error());
                (jar, Redirect::to(&target)).into_response()
            }
            Err(err) => {
                tracing::warn!(error = %err, "oauth2 login failed");
                metrics::counter!("warden_oauth2_logins_total", "result" => err.code())
                    .increment(1);
                let jar = jar
                    .add(self.cookies.error(err.code(), &err.to_string()))
                    .add(self.cookies.provider(self.provider.name(), false));
                (jar, Redirect::to(&target)).into_response()
            }
        }
    }

    fn recover_login(
        &self,
        jar: &CookieJar,
        query: &CallbackQuery,
    ) -> Result<LoginState, CallbackError> {
        let state = query
            .state
            .as_deref()
            .filter(|state| !state.is_empty())
            .ok_or(CallbackError::MissingState)?;
        match jar.get(STATE_COOKIE) {
            None => return Err(CallbackError::LoginExpired),
            Some(cookie) if cookie.value().as_bytes() != state.as_bytes() => {
                return Err(CallbackError::StateMismatch);
            }
            Some(_) => {}
        }
        self.codec.decode_login(state).map_err(|err| match err {
            CodecError::Expired => CallbackError::LoginExpired,
            other => CallbackError::MalformedState(other),
        })
    }

    async fn establish(
        &self,
        login: &LoginState,
        query: CallbackQuery,
    ) -> Result<(Identity, String), CallbackError> {
        if let Some(code) = query.error {
            return Err(CallbackError::ProviderDenied {
                code,
                description: query.error_description.unwrap_or_default(),
            });
        }
        let code = query
            .code
            .filter(|code| !code.is_empty())
            .ok_or(CallbackError::MissingCode)?;
        let tokens = self
            .provider
            .exchange_code(&code, &login.pkce_verifier)
            .await
            .map_err(CallbackError::Exchange)?;
        let identity = self
            .provider
            .verify(&tokens.access_token)
            .await
            .map_err(CallbackError::Verification)?;
        let session = self
            .codec
            .seal(&SessionAuthStorage::from(tokens))
            .map_err(CallbackError::Session)?;
        Ok((identity, session))
    }

    /// Verify the session cookie, refreshing once if the access token is
    /// rejected.
    pub async fn authenticate(&self, jar: &CookieJar) -> Result<Authenticated, AuthError> {
        let cookie = jar.get(SESSION_COOKIE).ok_or(AuthError::NoSession)?;
        let storage: SessionAuthStorage = self
            .codec
            .open(cookie.value())
            .map_err(AuthError::InvalidSession)?;

        match self.provider.verify(&storage.access_token).await {
            Ok(identity) => Ok(Authenticated {
                identity,
                renewed: None,
            }),
            Err(ProviderError::Rejected) => self.refresh(storage).await,
            Err(err) => Err(AuthError::Provider(err)),
        }
    }

    async fn refresh(&self, storage: SessionAuthStorage) -> Result<Authenticated, AuthError> {
        let Some(refresh_token) = storage.refresh_token else {
            return Err(AuthError::Rejected);
        };
        let result = async {
            let tokens = self.provider.refresh(&refresh_token).await?;
            let identity = self.provider.verify(&tokens.access_token).await?;
            Ok::<_, ProviderError>((identity, tokens))
        }
        .await;
        let (identity, tokens) = match result {
            Ok(value) => value,
            Err(err) => {
                let label = if err.is_rejected() { "rejected" } else { "error" };
                metrics::counter!("warden_oauth2_refresh_total", "result" => label).increment(1);
                tracing::info!(error = %err, "session refresh failed");
                return Err(if err.is_rejected() {
                    AuthError::Rejected
                } else {
                    AuthError::Provider(err)
                });
            }
        };
        metrics::counter!("warden_oauth2_refresh_total", "result" => "success").increment(1);
        tracing::debug!(identity = %identity, "session refreshed");
        // Providers that do not rotate refresh tokens omit them from the response.
        let storage = SessionAuthStorage {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.or(Some(refresh_token)),
        };
        let sealed = self
            .codec
            .seal(&storage)
            .map_err(AuthError::InvalidSession)?;
        Ok(Authenticated {
            identity,
            renewed: Some(self.cookies.session(sealed)),
        })
    }

    /// Cookies for a request that carried no usable session.
    pub fn mark_unauthenticated(&self, jar: CookieJar, err: &AuthError) -> CookieJar {
        let jar = jar.add(self.cookies.provider(self.provider.name(), false));
        match err {
            AuthError::InvalidSession(_) | AuthError::Rejected => {
                jar.add(self.cookies.clear_session())
            }
            AuthError::NoSession | AuthError::Provider(_) => jar,
        }
    }

    /// Cookies for a request that authenticated successfully.
    pub fn mark_authenticated(&self, jar: CookieJar, authenticated: &Authenticated) -> CookieJar {
        let jar = jar.add(self.cookies.provider(self.provider.name(), true));
        match &authenticated.renewed {
            Some(cookie) => jar.add(cookie.clone()),
            None => jar,
        }
    }

    pub fn logout(&self, jar: CookieJar) -> Response {
        let jar = jar
            .add(self.cookies.clear_session())
            .add(self.cookies.provider(self.provider.name(), false));
        (jar, Redirect::to("/")).into_response()
    }
}

#[async_trait]
impl Lifecycle for Authenticator {
    async fn start(&self) -> Result<(), LifecycleError> {
        let provider = Arc::clone(&self.provider);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                match provider.prefetch().await {
                    Ok(()) => {
                        tracing::debug!(
                            provider = provider.name(),
                            "identity provider metadata ready"
                        );
                        return;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "identity provider prefetch failed; retrying");
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(PREFETCH_RETRY) => {}
                }
            }
        });
        *self.prefetch.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self, deadline: Instant) -> Result<(), LifecycleError> {
        self.cancel.cancel();
        let Some(mut handle) = self.prefetch.lock().take() else {
            return Ok(());
        };
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(_) => Ok(()),
            Err(_) => {
                handle.abort();
                Err(LifecycleError::StopTimeout {
                    component: format!("{} authenticator", self.provider.name()),
                })
            }
        }
    }
}

/// Where to send the browser after login, from the preserved authorize query.
///
/// `originalPath` is honoured only when it is a local absolute path; the
/// parameter itself is stripped and every other parameter is kept.
pub fn redirect_target(original_query: &str) -> String {
    let mut path = None;
    let mut rest = form_urlencoded::Serializer::new(String::new());
    let mut has_rest = false;
    for (key, value) in form_urlencoded::parse(original_query.as_bytes()) {
        if key == ORIGINAL_PATH_PARAM {
            path = Some(value.into_owned());
        } else {
            rest.append_pair(&key, &value);
            has_rest = true;
        }
    }
    let path = path
        .filter(|path| is_local_path(path))
        .unwrap_or_else(|| "/".to_string());
    if !has_rest {
        return path;
    }
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}{}", rest.finish())
}

fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}
