//! OpenAPI schema aggregation for the gateway API.
use crate::api::types::{
    ErrorResponse, HealthStatus, IdentityView, NamespaceListResponse, NamespaceResponse,
    SystemInfo, WhoAmIResponse,
};
use crate::api::{namespaces, system, whoami};
use axum::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "warden-gateway",
        version = "v1",
        description = "Warden gateway HTTP API"
    ),
    paths(
        system::system_info,
        system::system_health,
        whoami::whoami,
        namespaces::list_namespaces,
        namespaces::get_namespace
    ),
    components(schemas(
        SystemInfo,
        HealthStatus,
        ErrorResponse,
        IdentityView,
        WhoAmIResponse,
        NamespaceListResponse,
        NamespaceResponse
    )),
    tags(
        (name = "system", description = "System and health endpoints"),
        (name = "identity", description = "Identity introspection"),
        (name = "namespaces", description = "Namespace visibility")
    )
)]
pub struct ApiDoc;

pub(crate) async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
