//! Explicit escalation from an identity's client to the privileged client.
//!
//! Handlers receive a [`RequestScope`] carrying the caller's identity. The
//! ambient client is always the caller's own; the privileged client is only
//! reachable through [`RequestScope::escalated`] (or
//! [`ClientCache::escalate`] outside a request), which requires an
//! [`EscalationReason`]. Grepping for `escalated(` lists every privileged call.
use crate::cache::{ClientCache, ScopedClient};
use crate::errors::AuthzResult;
use crate::identity::Identity;
use std::fmt;
use std::sync::Arc;

/// Why an operation bypasses the caller's own authorization.
///
/// Only operations that are meta to the authorization model qualify: the
/// caller's access to the primary resource has already been checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscalationReason {
    /// Enumerating candidate namespaces before per-identity probing.
    NamespaceDiscovery,
    /// Writing an audit record about the caller's request.
    AuditEvent,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationReason::NamespaceDiscovery => "namespace_discovery",
            EscalationReason::AuditEvent => "audit_event",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ClientCache {
    /// Hand out the privileged client for `reason`.
    pub fn escalate(&self, reason: EscalationReason) -> ScopedClient {
        metrics::counter!("warden_privilege_escalations_total", "reason" => reason.as_str())
            .increment(1);
        tracing::debug!(reason = %reason, "escalating to privileged client");
        self.privileged()
    }
}

/// Per-request authorization context: who is acting, and where their clients
/// come from.
#[derive(Clone)]
pub struct RequestScope {
    identity: Option<Identity>,
    clients: Arc<ClientCache>,
}

impl RequestScope {
    pub fn new(identity: Option<Identity>, clients: Arc<ClientCache>) -> Self {
        Self { identity, clients }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.identity.is_none()
    }

    /// The caller's own client.
    pub async fn client(&self) -> AuthzResult<ScopedClient> {
        self.clients.get(self.identity.as_ref()).await
    }

    /// The privileged client, regardless of the caller.
    pub fn escalated(&self, reason: EscalationReason) -> ScopedClient {
        if let Some(identity) = &self.identity {
            tracing::debug!(identity = %identity, reason = %reason, "request escalation");
        }
        self.clients.escalate(reason)
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AuditEvent;
    use crate::fixture::FakeCluster;

    fn scope(cluster: &FakeCluster, identity: Option<Identity>) -> RequestScope {
        let cache = Arc::new(ClientCache::new(cluster.factory(), 8).expect("cache"));
        RequestScope::new(identity, cache)
    }

    #[tokio::test]
    async fn ambient_client_carries_caller_identity() {
        let cluster = FakeCluster::new(["default"]);
        let bob = Identity::new("bob", ["dev"]);
        let scope = scope(&cluster, Some(bob.clone()));

        let client = scope.client().await.expect("client");
        assert_eq!(client.identity(), Some(&bob));
        assert!(client.list_namespaces().await.unwrap_err().is_forbidden());
    }

    #[tokio::test]
    async fn escalated_client_ignores_caller_identity() {
        let cluster = FakeCluster::new(["default", "payments"]);
        let scope = scope(&cluster, Some(Identity::new("bob", ["dev"])));

        let client = scope.escalated(EscalationReason::NamespaceDiscovery);
        assert!(client.is_privileged());
        assert_eq!(
            client.list_namespaces().await.expect("list"),
            vec!["default", "payments"]
        );
    }

    #[tokio::test]
    async fn escalated_audit_event_is_recorded_as_privileged() {
        let cluster = FakeCluster::new(["default"]);
        let scope = scope(&cluster, Some(Identity::new("bob", ["dev"])));
        let event = AuditEvent {
            namespace: "default".to_string(),
            reason: "NamespaceRead".to_string(),
            message: "bob read namespace default".to_string(),
        };
        scope
            .escalated(EscalationReason::AuditEvent)
            .record_event(&event)
            .await
            .expect("event");

        let events = cluster.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subject, None);
        assert_eq!(events[0].event, event);
    }

    #[tokio::test]
    async fn unrestricted_scope_uses_privileged_client() {
        let cluster = FakeCluster::new(["default"]);
        let scope = scope(&cluster, None);
        assert!(scope.is_unrestricted());
        assert!(scope.client().await.expect("client").is_privileged());
    }

    #[test]
    fn reason_labels_are_stable() {
        assert_eq!(EscalationReason::AuditEvent.to_string(), "audit_event");
        assert_eq!(
            EscalationReason::NamespaceDiscovery.as_str(),
            "namespace_discovery"
        );
    }
}
