//! HTTP routes for the OAuth2 flow.
//!
//! Only mounted in generations whose authentication type is `oauth2`.
use crate::oauth2::authenticator::{Authenticator, CallbackQuery};
use axum::Router;
use axum::extract::{Query, RawQuery, State};
use axum::response::Response;
use axum::routing::get;
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

pub fn router<S>(auth: Arc<Authenticator>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/oauth2/authorize", get(authorize))
        .route("/oauth2/callback", get(callback))
        .route("/oauth2/logout", get(logout))
        .with_state(auth)
}

async fn authorize(
    State(auth): State<Arc<Authenticator>>,
    jar: CookieJar,
    RawQuery(query): RawQuery,
) -> Response {
    auth.authorize(jar, query.as_deref()).await
}

async fn callback(
    State(auth): State<Arc<Authenticator>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Response {
    auth.callback(jar, query).await
}

async fn logout(State(auth): State<Arc<Authenticator>>, jar: CookieJar) -> Response {
    auth.logout(jar)
}
