//! In-memory cluster used by unit and integration tests.
//!
//! [`FakeCluster`] holds a namespace list plus per-user grants that tests can
//! change while requests are in flight. Clients built by [`FakeClientFactory`]
//! answer access reviews from those grants and count every remote-looking call
//! so tests can assert when the cluster was (or was not) consulted.
use crate::client::{AccessCheck, AuditEvent, ClientFactory, ClusterApi};
use crate::errors::{AuthzResult, ClientError};
use crate::identity::Identity;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// An event recorded by a fake client, tagged with the subject that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// `None` when the privileged client recorded the event.
    pub subject: Option<String>,
    pub event: AuditEvent,
}

#[derive(Default)]
struct FakeState {
    namespaces: RwLock<Vec<String>>,
    grants: RwLock<HashMap<String, BTreeSet<String>>>,
    cluster_readers: RwLock<HashSet<String>>,
    events: Mutex<Vec<RecordedEvent>>,
    delay: Mutex<Option<Duration>>,
    fail_listing: AtomicBool,
    list_calls: AtomicUsize,
    access_checks: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<FakeState>,
}

impl FakeCluster {
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cluster = Self::default();
        *cluster.state.namespaces.write() = namespaces.into_iter().map(Into::into).collect();
        cluster
    }

    /// Allow `user` to read `namespace`.
    pub fn grant(&self, user: &str, namespace: &str) {
        self.state
            .grants
            .write()
            .entry(user.to_string())
            .or_default()
            .insert(namespace.to_string());
    }

    /// Allow `user` to list namespaces cluster-wide.
    pub fn grant_cluster_read(&self, user: &str) {
        self.state.cluster_readers.write().insert(user.to_string());
    }

    /// Delay every call by `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.state.delay.lock() = delay;
    }

    /// Make namespace listing fail with a 503 until reset.
    pub fn fail_listing(&self, fail: bool) {
        self.state.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    pub fn access_checks(&self) -> usize {
        self.state.access_checks.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.state.events.lock().clone()
    }

    pub fn factory(&self) -> Arc<FakeClientFactory> {
        Arc::new(FakeClientFactory {
            cluster: self.clone(),
            builds: AtomicUsize::new(0),
        })
    }

    fn allows(&self, user: &str, check: &AccessCheck) -> bool {
        if self.state.cluster_readers.read().contains(user) {
            return true;
        }
        let target = match (&check.name, &check.namespace) {
            (Some(name), _) if check.resource == "namespaces" => name,
            (_, Some(namespace)) => namespace,
            _ => return false,
        };
        self.state
            .grants
            .read()
            .get(user)
            .is_some_and(|set| set.contains(target))
    }
}

/// Factory counting how many clients it has built.
pub struct FakeClientFactory {
    cluster: FakeCluster,
    builds: AtomicUsize,
}

impl FakeClientFactory {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ClientFactory for FakeClientFactory {
    fn build(&self, identity: Option<&Identity>) -> AuthzResult<Arc<dyn ClusterApi>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeClusterClient {
            cluster: self.cluster.clone(),
            identity: identity.cloned(),
        }))
    }
}

struct FakeClusterClient {
    cluster: FakeCluster,
    identity: Option<Identity>,
}

impl FakeClusterClient {
    async fn pause(&self) {
        let delay = *self.cluster.state.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ClusterApi for FakeClusterClient {
    async fn list_namespaces(&self) -> AuthzResult<Vec<String>> {
        self.cluster.state.list_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.cluster.state.fail_listing.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                endpoint: "/api/v1/namespaces".to_string(),
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            });
        }
        match &self.identity {
            Some(identity)
                if !self
                    .cluster
                    .allows(identity.name(), &AccessCheck::list_namespaces()) =>
            {
                Err(ClientError::Forbidden {
                    subject: identity.name().to_string(),
                    action: "list namespaces".to_string(),
                })
            }
            _ => Ok(self.cluster.state.namespaces.read().clone()),
        }
    }

    async fn check_access(&self, check: &AccessCheck) -> AuthzResult<bool> {
        self.cluster.state.access_checks.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(match &self.identity {
            None => true,
            Some(identity) => self.cluster.allows(identity.name(), check),
        })
    }

    async fn record_event(&self, event: &AuditEvent) -> AuthzResult<()> {
        self.pause().await;
        self.cluster.state.events.lock().push(RecordedEvent {
            subject: self.identity.as_ref().map(|id| id.name().to_string()),
            event: event.clone(),
        });
        Ok(())
    }
}
