//! Per-request identity resolution.
//!
//! # Purpose
//! Turns the active generation's authentication mode into an
//! `Option<Identity>` for each API request and hands handlers a
//! [`RequestScope`] bound to it.
//!
//! # Key invariants
//! - `none` mode yields no identity, so handlers act with the privileged
//!   client; `anonymous` yields the configured identity; `oauth2` yields the
//!   identity verified from the session cookie.
//! - An OAuth2 request without a usable session is answered with 401 and the
//!   provider indicator cookie set to unauthenticated.
//! - A refreshed session cookie is attached to whatever response the handler
//!   produced.
use crate::api::error::{ApiError, api_unauthorized};
use crate::app::GenerationState;
use crate::oauth2::authenticator::Authenticator;
use crate::reload::config::{AuthenticationConfig, AuthenticationKind};
use async_trait::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use warden_authz::{Identity, RequestScope};

/// How the active generation authenticates requests.
#[derive(Clone)]
pub enum AuthMode {
    None,
    Anonymous(Identity),
    OAuth2(Arc<Authenticator>),
}

impl AuthMode {
    pub fn kind(&self) -> AuthenticationKind {
        match self {
            AuthMode::None => AuthenticationKind::None,
            AuthMode::Anonymous(_) => AuthenticationKind::Anonymous,
            AuthMode::OAuth2(_) => AuthenticationKind::OAuth2,
        }
    }

    /// The identity for `anonymous` mode. Other modes return `None`.
    pub fn anonymous_identity(config: &AuthenticationConfig) -> Option<Identity> {
        config
            .anonymous
            .as_ref()
            .map(|anon| Identity::new(anon.username.clone(), anon.groups.iter().cloned()))
    }

    pub fn authenticator(&self) -> Option<&Arc<Authenticator>> {
        match self {
            AuthMode::OAuth2(auth) => Some(auth),
            _ => None,
        }
    }
}

/// Identity resolved by [`require_identity`], stored in request extensions.
#[derive(Debug, Clone)]
pub struct RequestIdentity(pub Option<Identity>);

/// Resolve the caller's identity or reject the request.
pub async fn require_identity(
    State(state): State<GenerationState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    match &state.auth {
        AuthMode::None => {
            request.extensions_mut().insert(RequestIdentity(None));
            next.run(request).await
        }
        AuthMode::Anonymous(identity) => {
            request
                .extensions_mut()
                .insert(RequestIdentity(Some(identity.clone())));
            next.run(request).await
        }
        AuthMode::OAuth2(auth) => match auth.authenticate(&jar).await {
            Ok(authenticated) => {
                request
                    .extensions_mut()
                    .insert(RequestIdentity(Some(authenticated.identity.clone())));
                let response = next.run(request).await;
                (auth.mark_authenticated(jar, &authenticated), response).into_response()
            }
            Err(err) => {
                tracing::debug!(error = %err, "request not authenticated");
                (auth.mark_unauthenticated(jar, &err), err.to_api_error()).into_response()
            }
        },
    }
}

/// Extractor giving handlers a [`RequestScope`] for the resolved identity.
pub struct AuthScope(pub RequestScope);

#[async_trait]
impl FromRequestParts<GenerationState> for AuthScope {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &GenerationState,
    ) -> Result<Self, Self::Rejection> {
        let RequestIdentity(identity) = parts
            .extensions
            .get::<RequestIdentity>()
            .cloned()
            .ok_or_else(|| api_unauthorized("authentication required"))?;
        Ok(AuthScope(RequestScope::new(
            identity,
            Arc::clone(&state.clients),
        )))
    }
}
