//! Warden authorization primitives shared by the gateway and its collaborators.
//!
//! # Purpose
//! Answers two questions for every inbound request: which [`Identity`] is
//! acting, and which cluster client carries that identity's authorization
//! context. Also answers "which namespaces can this identity see".
//!
//! # How it fits
//! The gateway authenticates a request, attaches an optional [`Identity`] to
//! it, and hands a [`RequestScope`] to handlers. Handlers talk to the cluster
//! only through [`ScopedClient`]s obtained from a generation-owned
//! [`ClientCache`], so every call is impersonated as the caller.
//!
//! # Key invariants
//! - `None` identity means unrestricted access; it never goes through the
//!   per-identity cache and always resolves to the privileged client.
//! - Cache lookups never perform remote authorization checks. Denials surface
//!   as [`ClientError::Forbidden`] at the point of use.
//! - Escalation to the privileged client is explicit at the call site and
//!   carries an [`EscalationReason`].
//!
//! # Examples
//! ```rust
//! use warden_authz::Identity;
//!
//! let a = Identity::new("alice", ["dev", "ops", "dev"]);
//! let b = Identity::new("alice", ["ops", "dev"]);
//! assert_eq!(a, b);
//! ```

mod cache;
mod client;
mod errors;
mod escalation;
mod identity;
mod namespaces;

#[cfg(any(test, feature = "test-fixture"))]
pub mod fixture;

pub use cache::{ClientCache, ScopedClient};
pub use client::{
    AccessCheck, AuditEvent, ClientFactory, ClusterApi, KubeClient, KubeClientFactory,
    KubeClientSettings,
};
pub use errors::{AuthzResult, ClientError};
pub use escalation::{EscalationReason, RequestScope};
pub use identity::Identity;
pub use namespaces::{
    NamespaceProbe, NamespaceResolver, NamespaceResolverConfig, NamespaceVisibility,
};
