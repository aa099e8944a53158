//! Namespace API handlers.
//!
//! # Purpose and responsibility
//! Exposes the caller's namespace visibility and a single-namespace read that
//! is authorized against the caller's own identity.
//!
//! # Key invariants and assumptions
//! - Listing goes through the generation's [`warden_authz::NamespaceResolver`],
//!   so repeated calls within the TTL do not reach the cluster.
//! - A single-namespace read asks the cluster with the caller's impersonated
//!   client; a denial is a 403 naming the caller and the namespace.
//! - The audit event for a successful read is written with the escalated
//!   client. Audit failures never fail the read.
use crate::api::error::{ApiError, api_client_error, api_forbidden};
use crate::api::types::{ErrorResponse, NamespaceListResponse, NamespaceResponse};
use crate::app::GenerationState;
use crate::session::AuthScope;
use axum::Json;
use axum::extract::{Path, State};
use warden_authz::{AccessCheck, AuditEvent, EscalationReason};

const PRIVILEGED_SUBJECT: &str = "warden";

#[utoipa::path(
    get,
    path = "/api/v1/namespaces",
    tag = "namespaces",
    responses(
        (status = 200, description = "Namespaces visible", body = NamespaceListResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse)
    )
)]
pub(crate) async fn list_namespaces(
    State(state): State<GenerationState>,
    AuthScope(scope): AuthScope,
) -> Result<Json<NamespaceListResponse>, ApiError> {
    let visibility = state
        .namespaces
        .visible_namespaces(scope.identity())
        .await
        .map_err(|err| api_client_error("failed to list namespaces", &err))?;
    Ok(Json(NamespaceListResponse {
        items: visibility.namespaces,
        unrestricted: visibility.unrestricted,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/namespaces/{namespace}",
    tag = "namespaces",
    params(("namespace" = String, Path, description = "Namespace name")),
    responses(
        (status = 200, description = "Namespace is readable", body = NamespaceResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 403, description = "Caller may not read the namespace", body = ErrorResponse)
    )
)]
pub(crate) async fn get_namespace(
    AuthScope(scope): AuthScope,
    Path(namespace): Path<String>,
) -> Result<Json<NamespaceResponse>, ApiError> {
    let subject = scope
        .identity()
        .map(|identity| identity.name().to_string())
        .unwrap_or_else(|| PRIVILEGED_SUBJECT.to_string());

    let client = scope
        .client()
        .await
        .map_err(|err| api_client_error("failed to read namespace", &err))?;
    let allowed = client
        .check_access(&AccessCheck::new("get", "namespaces").named(&namespace))
        .await
        .map_err(|err| api_client_error("failed to read namespace", &err))?;
    if !allowed {
        tracing::info!(subject = %subject, namespace = %namespace, "namespace read denied");
        return Err(api_forbidden(&format!(
            "{subject} is not allowed to get namespace {namespace}"
        )));
    }

    let event = AuditEvent {
        namespace: namespace.clone(),
        reason: "NamespaceRead".to_string(),
        message: format!("{subject} read namespace {namespace}"),
    };
    if let Err(err) = scope
        .escalated(EscalationReason::AuditEvent)
        .record_event(&event)
        .await
    {
        tracing::warn!(error = %err, namespace = %namespace, "failed to record audit event");
    }

    Ok(Json(NamespaceResponse { name: namespace }))
}
