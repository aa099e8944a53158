//! One live configuration generation.
//!
//! # Purpose
//! Owns everything built from a single [`ConfigGeneration`]: the client cache,
//! the namespace resolver, the authenticator, the router that uses them and
//! the background tasks that serve them.
//!
//! # Key invariants
//! - Construction has no side effects beyond building values; background work
//!   begins in [`Lifecycle::start`]. A generation that fails to build leaves
//!   nothing running.
//! - [`Lifecycle::stop`] cancels the generation's token, stops the
//!   authenticator, joins background tasks and waits for in-flight requests,
//!   all under one deadline.
//! - Caches are cleared once the generation has stopped, whether or not it
//!   drained in time.
use crate::app::{GenerationState, build_router};
use crate::oauth2::authenticator::Authenticator;
use crate::oauth2::codec::{CodecError, StateCodec};
use crate::oauth2::cookies::CookieSettings;
use crate::oauth2::provider::{ProviderError, ProviderFactory};
use crate::reload::config::{AuthenticationKind, ConfigError, ConfigGeneration};
use crate::reload::lifecycle::{InFlight, Lifecycle, LifecycleError};
use crate::session::AuthMode;
use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use warden_authz::{
    ClientCache, ClientError, ClientFactory, NamespaceResolver, NamespaceResolverConfig,
};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cluster client: {0}")]
    Client(#[from] ClientError),
    #[error("identity provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("state codec: {0}")]
    Codec(#[from] CodecError),
}

/// Process-scoped collaborators shared by every generation.
#[derive(Clone)]
pub struct GenerationDeps {
    pub client_factory: Arc<dyn ClientFactory>,
    pub provider_factory: Arc<dyn ProviderFactory>,
    pub cookies: CookieSettings,
    /// Bound on every outbound provider or cluster call.
    pub request_timeout: Duration,
}

pub struct Generation {
    version: Arc<str>,
    router: Router,
    state: GenerationState,
    cancel: CancellationToken,
    inflight: Arc<InFlight>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    refresh_interval: Duration,
}

/// Build, but do not start, the generation described by `config`.
pub fn build_generation(
    config: &ConfigGeneration,
    deps: &GenerationDeps,
) -> Result<Generation, GenerationError> {
    let runtime = config.config();
    let clients = Arc::new(ClientCache::new(
        Arc::clone(&deps.client_factory),
        runtime.authentication.user_cache_size,
    )?);
    let namespaces = Arc::new(NamespaceResolver::new(
        Arc::clone(&clients),
        NamespaceResolverConfig {
            ttl: runtime.cache.namespaces_ttl(),
            probe_timeout: deps.request_timeout,
            ..NamespaceResolverConfig::default()
        },
    ));

    let auth = match runtime.authentication.kind {
        AuthenticationKind::None => AuthMode::None,
        AuthenticationKind::Anonymous => AuthMode::Anonymous(
            AuthMode::anonymous_identity(&runtime.authentication)
                .ok_or(ConfigError::MissingSection("anonymous"))?,
        ),
        AuthenticationKind::OAuth2 => {
            let oauth2 = runtime
                .authentication
                .oauth2
                .as_ref()
                .ok_or(ConfigError::MissingSection("oauth2"))?;
            let provider = deps.provider_factory.build(oauth2, deps.request_timeout)?;
            let codec = StateCodec::new(&oauth2.client_secret)?;
            AuthMode::OAuth2(Arc::new(Authenticator::new(provider, codec, deps.cookies)))
        }
    };

    let version: Arc<str> = config.version().into();
    let state = GenerationState {
        version: Arc::clone(&version),
        auth,
        clients,
        namespaces,
    };
    Ok(Generation {
        version,
        router: build_router(state.clone()),
        state,
        cancel: CancellationToken::new(),
        inflight: Arc::new(InFlight::default()),
        tasks: Mutex::new(Vec::new()),
        refresh_interval: runtime.cache.refresh_interval(),
    })
}

impl Generation {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    pub fn inflight(&self) -> &Arc<InFlight> {
        &self.inflight
    }

    pub fn is_retired(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
impl Lifecycle for Generation {
    async fn start(&self) -> Result<(), LifecycleError> {
        let refresher = self
            .state
            .namespaces
            .spawn_refresher(self.refresh_interval, self.cancel.child_token());
        self.tasks.lock().push(refresher);
        if let Some(auth) = self.state.auth.authenticator() {
            auth.start().await?;
        }
        tracing::debug!(version = %self.version, "generation started");
        Ok(())
    }

    async fn stop(&self, deadline: Instant) -> Result<(), LifecycleError> {
        self.cancel.cancel();
        let drained = tokio::time::timeout_at(deadline, async {
            if let Some(auth) = self.state.auth.authenticator()
                && let Err(err) = auth.stop(deadline).await
            {
                tracing::warn!(
                    version = %self.version,
                    error = %err,
                    "authenticator did not stop cleanly"
                );
            }
            let tasks = std::mem::take(&mut *self.tasks.lock());
            for task in tasks {
                let _ = task.await;
            }
            self.inflight.wait_idle().await;
        })
        .await;
        self.state.clients.clear();
        self.state.namespaces.clear();

        match drained {
            Ok(()) => {
                tracing::debug!(version = %self.version, "generation stopped");
                Ok(())
            }
            Err(_) => Err(LifecycleError::DeadlineExceeded {
                version: self.version.to_string(),
                in_flight: self.inflight.count(),
            }),
        }
    }
}
