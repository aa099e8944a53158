//! Identity-scoped cache of cluster clients.
//!
//! # Purpose
//! Hand out one impersonating client per distinct [`Identity`], built lazily on
//! first lookup and reused until evicted or until the owning generation is
//! retired.
//!
//! # Key invariants
//! - At most one client is constructed per identity while it stays cached.
//! - A `None` identity never touches the LRU; it resolves to the privileged
//!   client built eagerly in [`ClientCache::new`].
//! - Lookups never contact the cluster. Authorization happens when the client
//!   is used.
//! - Entries are only inserted or evicted; a cached client is never replaced
//!   in place.
//!
//! # Concurrency model
//! The LRU sits behind a `parking_lot::Mutex` held only long enough to fetch
//! or insert a per-identity `OnceCell` slot. Construction runs on the slot, so
//! racing lookups for the same identity share one build while lookups for
//! other identities proceed independently.
//!
//! Only built slots count against capacity. A slot whose build is still
//! running never displaces a live client, and a slot whose build failed is
//! dropped again.
use crate::client::{ClientFactory, ClusterApi};
use crate::errors::{AuthzResult, ClientError};
use crate::identity::Identity;
use lru::LruCache;
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;

type Slot = Arc<OnceCell<ScopedClient>>;

pub struct ClientCache {
    factory: Arc<dyn ClientFactory>,
    privileged: ScopedClient,
    capacity: usize,
    entries: Mutex<LruCache<Identity, Slot>>,
}

impl ClientCache {
    /// Build a cache holding at most `capacity` identities.
    ///
    /// The privileged client is constructed immediately so that a broken
    /// factory fails generation construction rather than the first request.
    pub fn new(factory: Arc<dyn ClientFactory>, capacity: usize) -> AuthzResult<Self> {
        if capacity == 0 {
            return Err(ClientError::Build(
                "client cache capacity must be positive".to_string(),
            ));
        }
        let privileged = ScopedClient::new(None, factory.build(None)?);
        Ok(Self {
            factory,
            privileged,
            capacity,
            entries: Mutex::new(LruCache::unbounded()),
        })
    }

    /// Return the client bound to `identity`, building it on a miss.
    pub async fn get(&self, identity: Option<&Identity>) -> AuthzResult<ScopedClient> {
        let Some(identity) = identity else {
            return Ok(self.privileged.clone());
        };
        let slot = self.slot(identity);
        if let Some(client) = slot.get() {
            return Ok(client.clone());
        }
        let built = slot
            .get_or_try_init(|| async {
                let api = self.factory.build(Some(identity))?;
                tracing::debug!(identity = %identity, "built cluster client");
                Ok::<_, ClientError>(ScopedClient::new(Some(identity.clone()), api))
            })
            .await;
        match built {
            Ok(client) => {
                let client = client.clone();
                self.admit(identity, &slot);
                Ok(client)
            }
            Err(err) => {
                self.discard(identity, &slot);
                Err(err)
            }
        }
    }

    fn slot(&self, identity: &Identity) -> Slot {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.get(identity) {
            return slot.clone();
        }
        let slot = Slot::default();
        entries.put(identity.clone(), slot.clone());
        slot
    }

    /// Record a freshly built slot and evict least recently used built
    /// clients beyond capacity.
    fn admit(&self, identity: &Identity, slot: &Slot) {
        let mut entries = self.entries.lock();
        if entries.peek(identity).is_none() {
            entries.put(identity.clone(), slot.clone());
        }
        let mut built = entries.iter().filter(|(_, slot)| slot.initialized()).count();
        while built > self.capacity {
            let victim = entries
                .iter()
                .rev()
                .find(|(key, slot)| slot.initialized() && *key != identity)
                .map(|(key, _)| key.clone());
            let Some(victim) = victim else {
                break;
            };
            entries.pop(&victim);
            built -= 1;
            metrics::counter!("warden_client_cache_evictions_total").increment(1);
            tracing::debug!(identity = %victim, "evicted cached cluster client");
        }
        metrics::gauge!("warden_client_cache_entries").set(built as f64);
    }

    fn discard(&self, identity: &Identity, slot: &Slot) {
        let mut entries = self.entries.lock();
        let unbuilt = entries
            .peek(identity)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized());
        if unbuilt {
            entries.pop(identity);
        }
    }

    /// The unrestricted client. Callers inside a request should go through
    /// [`ClientCache::escalate`] so the escalation is logged.
    pub(crate) fn privileged(&self) -> ScopedClient {
        self.privileged.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every cached identity client. Used when a generation retires.
    pub fn clear(&self) {
        self.entries.lock().clear();
        metrics::gauge!("warden_client_cache_entries").set(0.0);
    }
}

impl fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("ClientCache")
            .field("len", &entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

struct ClientEntry {
    identity: Option<Identity>,
    created_at: Instant,
    api: Arc<dyn ClusterApi>,
}

/// A cached client together with the identity it acts for.
///
/// Cloning is cheap and preserves identity: [`ScopedClient::ptr_eq`] holds
/// between clones of the same cache entry.
#[derive(Clone)]
pub struct ScopedClient {
    inner: Arc<ClientEntry>,
}

impl ScopedClient {
    fn new(identity: Option<Identity>, api: Arc<dyn ClusterApi>) -> Self {
        Self {
            inner: Arc::new(ClientEntry {
                identity,
                created_at: Instant::now(),
                api,
            }),
        }
    }

    /// `None` for the privileged client.
    pub fn identity(&self) -> Option<&Identity> {
        self.inner.identity.as_ref()
    }

    pub fn is_privileged(&self) -> bool {
        self.inner.identity.is_none()
    }

    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    pub fn ptr_eq(&self, other: &ScopedClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Deref for ScopedClient {
    type Target = dyn ClusterApi;

    fn deref(&self) -> &Self::Target {
        self.inner.api.as_ref()
    }
}

impl fmt::Debug for ScopedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedClient")
            .field("identity", &self.inner.identity)
            .field("created_at", &self.inner.created_at)
            .finish()
    }
}
