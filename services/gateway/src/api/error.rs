//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Centralizes HTTP error response construction so every gateway endpoint,
//! including the OAuth2 flow, returns the same JSON error shape.
//!
//! # Key invariants and assumptions
//! - Error responses must include a stable `code` and human-readable `message`.
//! - Status codes must align with the error category.
//!
//! # Security considerations
//! - Cluster and provider failures log details server-side but return generic
//!   messages.
//! - Authorization denials name the subject and the action, never the cluster
//!   response body.
use crate::api::types::ErrorResponse;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use warden_authz::ClientError;

/// Structured API error returned by handlers.
///
/// # Invariants
/// - `status` must match the semantics of `body.code`.
///
/// # Example
/// ```rust
/// use axum::http::StatusCode;
/// use gateway::api::error::api_forbidden;
///
/// let err = api_forbidden("alice is not allowed to get namespace payments");
/// assert_eq!(err.status, StatusCode::FORBIDDEN);
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

/// Build a 500 Internal Server Error with the provided message.
pub fn api_internal_message(message: &str) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Build a 401 Unauthorized error.
pub fn api_unauthorized(message: &str) -> ApiError {
    // Authentication failed or missing.
    api_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

/// Build a 403 Forbidden error.
pub fn api_forbidden(message: &str) -> ApiError {
    // Authorization failed despite authentication.
    api_error(StatusCode::FORBIDDEN, "forbidden", message)
}

/// Build a 400 Bad Request validation error.
pub fn api_validation_error(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// Translate a cluster client failure.
///
/// # What it does
/// Authorization denials become 403 with the denial text; everything else is
/// logged and returned as a generic 500.
pub fn api_client_error(context: &str, err: &ClientError) -> ApiError {
    match err {
        ClientError::Forbidden { .. } => api_forbidden(&err.to_string()),
        ClientError::Timeout(_) => {
            tracing::warn!(error = %err, "{context}");
            api_internal_message(&format!("{context}: cluster call timed out"))
        }
        _ => {
            tracing::error!(error = ?err, "{context}");
            api_internal_message(context)
        }
    }
}
