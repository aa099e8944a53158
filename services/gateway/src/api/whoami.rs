//! Identity introspection handler.
use crate::api::types::{ErrorResponse, IdentityView, WhoAmIResponse};
use crate::session::AuthScope;
use axum::Json;

#[utoipa::path(
    get,
    path = "/api/v1/whoami",
    tag = "identity",
    responses(
        (status = 200, description = "Identity resolved for this request", body = WhoAmIResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse)
    )
)]
/// Return the identity the gateway resolved for this request.
///
/// `identity` is `null` when the active generation runs without
/// authentication, in which case the caller acts unrestricted.
pub(crate) async fn whoami(AuthScope(scope): AuthScope) -> Json<WhoAmIResponse> {
    Json(WhoAmIResponse {
        identity: scope.identity().map(IdentityView::from),
        unrestricted: scope.is_unrestricted(),
    })
}
