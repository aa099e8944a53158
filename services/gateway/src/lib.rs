//! Warden gateway library crate.
//!
//! # Purpose
//! Exposes the gateway's HTTP application, OAuth2 flow, reload orchestrator,
//! configuration and observability wiring for use by the binary and tests.
pub mod api;
pub mod app;
pub mod assets;
pub mod config;
pub mod oauth2;
pub mod observability;
pub mod reload;
pub mod session;
