//! Gateway HTTP API module.
//!
//! # Purpose
//! A small API surface that consumes the identity and authorization decisions
//! made per request: identity introspection, namespace visibility and system
//! status.
pub mod error;
pub mod namespaces;
pub mod openapi;
pub mod system;
pub mod types;
pub mod whoami;
