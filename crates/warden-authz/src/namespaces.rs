//! Namespace visibility with a per-identity TTL cache.
//!
//! # Purpose
//! Answer "which namespaces can this identity see" for listing and filtering
//! logic, without re-probing the cluster on every request.
//!
//! # Key invariants
//! - An entry is fresh while `computed_at.elapsed() < ttl`; an expired entry
//!   is never returned.
//! - Each identity has its own async mutex, so an expired entry is recomputed
//!   once while concurrent readers for the same identity wait for the result.
//!   The computation is bounded by `probe_timeout`.
//! - Failed computations are not cached.
//!
//! # Concurrency model
//! Slots live in a `DashMap`; the map shard lock is released before awaiting
//! the per-identity mutex.
use crate::cache::ClientCache;
use crate::client::AccessCheck;
use crate::errors::{AuthzResult, ClientError};
use crate::escalation::EscalationReason;
use crate::identity::Identity;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The access check issued per candidate namespace.
///
/// For the `namespaces` resource the namespace is the object name (`get
/// namespaces/<ns>`); for any other resource the check is scoped into the
/// namespace (`list pods` in `<ns>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceProbe {
    pub verb: String,
    pub group: String,
    pub resource: String,
}

impl Default for NamespaceProbe {
    fn default() -> Self {
        Self {
            verb: "get".to_string(),
            group: String::new(),
            resource: "namespaces".to_string(),
        }
    }
}

impl NamespaceProbe {
    pub fn check_for(&self, namespace: &str) -> AccessCheck {
        let check = AccessCheck::new(&self.verb, &self.resource).with_group(&self.group);
        if self.group.is_empty() && self.resource == "namespaces" {
            check.named(namespace)
        } else {
            check.in_namespace(namespace)
        }
    }
}

#[derive(Debug, Clone)]
pub struct NamespaceResolverConfig {
    pub ttl: Duration,
    pub probe_timeout: Duration,
    pub max_concurrent_probes: usize,
    pub probe: NamespaceProbe,
}

impl Default for NamespaceResolverConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            max_concurrent_probes: 16,
            probe: NamespaceProbe::default(),
        }
    }
}

/// Cached answer for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceVisibility {
    /// Sorted namespace names. Holds every known namespace when `unrestricted`.
    pub namespaces: Vec<String>,
    pub unrestricted: bool,
    pub computed_at: Instant,
}

impl NamespaceVisibility {
    pub fn contains(&self, namespace: &str) -> bool {
        self.unrestricted || self.namespaces.binary_search_by(|n| n.as_str().cmp(namespace)).is_ok()
    }
}

type Slot = Arc<Mutex<Option<NamespaceVisibility>>>;

pub struct NamespaceResolver {
    clients: Arc<ClientCache>,
    config: NamespaceResolverConfig,
    entries: DashMap<Option<Identity>, Slot>,
}

impl NamespaceResolver {
    pub fn new(clients: Arc<ClientCache>, config: NamespaceResolverConfig) -> Self {
        Self {
            clients,
            config,
            entries: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Namespaces visible to `identity`, served from cache while fresh.
    pub async fn visible_namespaces(
        &self,
        identity: Option<&Identity>,
    ) -> AuthzResult<NamespaceVisibility> {
        let slot: Slot = self.entries.entry(identity.cloned()).or_default().clone();
        let mut entry = slot.lock().await;
        if let Some(cached) = entry.as_ref()
            && cached.computed_at.elapsed() < self.config.ttl
        {
            return Ok(cached.clone());
        }

        let timeout = self.config.probe_timeout;
        let computed = tokio::time::timeout(timeout, self.compute(identity))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;
        metrics::counter!("warden_namespace_cache_recomputations_total").increment(1);
        tracing::debug!(
            identity = ?identity.map(Identity::name),
            visible = computed.namespaces.len(),
            unrestricted = computed.unrestricted,
            "namespace visibility recomputed"
        );
        *entry = Some(computed.clone());
        Ok(computed)
    }

    async fn compute(&self, identity: Option<&Identity>) -> AuthzResult<NamespaceVisibility> {
        let mut all = self
            .clients
            .escalate(EscalationReason::NamespaceDiscovery)
            .list_namespaces()
            .await?;
        all.sort();
        all.dedup();

        let Some(identity) = identity else {
            return Ok(visibility(all, true));
        };
        let client = self.clients.get(Some(identity)).await?;
        if allowed(client.check_access(&AccessCheck::list_namespaces()).await)? {
            return Ok(visibility(all, true));
        }

        let probes = all.into_iter().map(|namespace| {
            let client = client.clone();
            let check = self.config.probe.check_for(&namespace);
            async move {
                allowed(client.check_access(&check).await).map(|ok| ok.then_some(namespace))
            }
        });
        let results: Vec<AuthzResult<Option<String>>> = futures::stream::iter(probes)
            .buffer_unordered(self.config.max_concurrent_probes.max(1))
            .collect()
            .await;

        let mut visible = Vec::new();
        for result in results {
            if let Some(namespace) = result? {
                visible.push(namespace);
            }
        }
        visible.sort();
        Ok(visibility(visible, false))
    }

    /// Drop entries that are expired or hold no value. Entries a reader holds
    /// or is recomputing are kept.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.config.ttl;
        self.entries.retain(|_, slot| {
            // Readers clone the slot under the shard lock that `retain` holds.
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(entry) => entry
                    .as_ref()
                    .is_some_and(|cached| cached.computed_at.elapsed() < ttl),
                Err(_) => true,
            }
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Periodically purge expired entries until `cancel` fires.
    pub fn spawn_refresher(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = resolver.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, "purged expired namespace visibility entries");
                        }
                    }
                }
            }
            tracing::debug!("namespace refresher stopped");
        })
    }
}

fn visibility(namespaces: Vec<String>, unrestricted: bool) -> NamespaceVisibility {
    NamespaceVisibility {
        namespaces,
        unrestricted,
        computed_at: Instant::now(),
    }
}

// A forbidden access review is a denial, not a failure.
fn allowed(result: AuthzResult<bool>) -> AuthzResult<bool> {
    match result {
        Err(err) if err.is_forbidden() => Ok(false),
        other => other,
    }
}
