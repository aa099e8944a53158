//! System/health API handlers.
//!
//! # Purpose and responsibility
//! Provides lightweight endpoints for the active generation and health checks.
//!
//! # Key invariants and assumptions
//! - Health checks must be fast and side-effect free.
//! - Both endpoints are served without authentication in every mode.
//!
//! # Security considerations
//! - System info reveals the configuration version and authentication mode,
//!   never any credential.
use crate::api::types::{HealthStatus, SystemInfo};
use crate::app::GenerationState;
use axum::Json;
use axum::extract::State;

pub const API_VERSION: &str = "v1";

#[utoipa::path(
    get,
    path = "/api/v1/system/info",
    tag = "system",
    responses(
        (status = 200, description = "Active configuration generation", body = SystemInfo)
    )
)]
/// Return the active generation's version and authentication mode.
pub(crate) async fn system_info(State(state): State<GenerationState>) -> Json<SystemInfo> {
    Json(SystemInfo {
        config_version: state.version.to_string(),
        authentication: state.auth.kind().as_str().to_string(),
        api_version: API_VERSION.to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/system/health",
    tag = "system",
    responses(
        (status = 200, description = "Gateway health", body = HealthStatus)
    )
)]
pub(crate) async fn system_health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
    })
}
