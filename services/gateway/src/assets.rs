//! Static asset fallback.
//!
//! Asset delivery itself lives outside the gateway; this handler stands in for
//! it. In OAuth2 generations it still attempts to authenticate the session so
//! the provider indicator cookie stays accurate, but it never withholds the
//! page.
use crate::app::GenerationState;
use axum::extract::State;
use axum::response::{Html, IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;

const INDEX_HTML: &str = concat!(
    "<!doctype html>\n",
    "<html><head><meta charset=\"utf-8\"><title>Warden</title></head>",
    "<body><div id=\"app\"></div></body></html>\n",
);

pub(crate) async fn serve_asset(State(state): State<GenerationState>, jar: CookieJar) -> Response {
    let Some(auth) = state.auth.authenticator() else {
        return Html(INDEX_HTML).into_response();
    };
    let jar = match auth.authenticate(&jar).await {
        Ok(authenticated) => auth.mark_authenticated(jar, &authenticated),
        Err(err) => {
            tracing::debug!(error = %err, "asset request without usable session");
            auth.mark_unauthenticated(jar, &err)
        }
    };
    (jar, Html(INDEX_HTML)).into_response()
}
