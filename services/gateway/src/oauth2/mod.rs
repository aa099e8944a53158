//! Stateless OAuth2 authorization-code flow with PKCE.
//!
//! # Purpose
//! Authenticates browser sessions without server-side storage: login state and
//! session credentials are sealed with [`codec::StateCodec`] and carried in
//! cookies. See [`authenticator`] for the state machine and [`cookies`] for the
//! cookie contract.
pub mod authenticator;
pub mod codec;
pub mod cookies;
pub mod pkce;
pub mod provider;
pub mod routes;
pub mod state;
