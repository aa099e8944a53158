//! Gateway HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router for one configuration generation and defines the
//! generation-owned state injected into handlers.
//!
//! # Notes
//! Every generation gets its own router and its own caches; nothing here is
//! process-global. The tracing layer is applied once, outside the generation
//! switch, by [`with_tracing`].
use crate::api;
use crate::assets;
use crate::oauth2;
use crate::observability;
use crate::session::{self, AuthMode};
use axum::Router;
use axum::middleware;
use axum::routing::get;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use warden_authz::{ClientCache, NamespaceResolver};

#[derive(Clone)]
pub struct GenerationState {
    pub version: Arc<str>,
    pub auth: AuthMode,
    pub clients: Arc<ClientCache>,
    pub namespaces: Arc<NamespaceResolver>,
}

pub fn build_router(state: GenerationState) -> Router {
    let authenticated = Router::new()
        .route("/api/v1/whoami", get(api::whoami::whoami))
        .route("/api/v1/namespaces", get(api::namespaces::list_namespaces))
        .route(
            "/api/v1/namespaces/:namespace",
            get(api::namespaces::get_namespace),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_identity,
        ));

    let mut router = Router::new()
        .route("/api/v1/system/info", get(api::system::system_info))
        .route("/api/v1/system/health", get(api::system::system_health))
        .route("/api/v1/openapi.json", get(api::openapi::openapi_json))
        .merge(authenticated);
    if let Some(auth) = state.auth.authenticator() {
        router = router.merge(oauth2::routes::router(Arc::clone(auth)));
    }
    router.fallback(assets::serve_asset).with_state(state)
}

/// Wrap `router` in the `http.request` span, parented on inbound trace
/// context.
pub fn with_tracing(router: Router) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });
    router.layer(trace_layer)
}
