//! HTTP API request/response types.
//!
//! # Purpose
//! Defines shared payload shapes for the gateway REST API and OpenAPI schema
//! generation.
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use warden_authz::Identity;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SystemInfo {
    /// Version of the active configuration generation.
    pub config_version: String,
    /// `none`, `anonymous` or `oauth2`.
    pub authentication: String,
    pub api_version: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct IdentityView {
    pub name: String,
    pub groups: Vec<String>,
}

impl From<&Identity> for IdentityView {
    fn from(identity: &Identity) -> Self {
        Self {
            name: identity.name().to_string(),
            groups: identity.groups().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct WhoAmIResponse {
    /// Absent when the gateway runs without authentication.
    pub identity: Option<IdentityView>,
    pub unrestricted: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct NamespaceListResponse {
    pub items: Vec<String>,
    /// True when the caller may read every namespace.
    pub unrestricted: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct NamespaceResponse {
    pub name: String,
}
