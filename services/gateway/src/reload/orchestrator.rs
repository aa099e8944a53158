//! Hot-reload orchestrator.
//!
//! # Purpose
//! Consumes configuration updates, builds a complete new generation for each,
//! atomically redirects new requests to it and retires the previous one.
//!
//! # Key invariants
//! - The active generation is held in an [`ArcSwap`]. Requests load it once;
//!   the only write is the swap itself.
//! - A request counts as in flight on a generation before that generation can
//!   be retired: the dispatcher enters the in-flight counter, then confirms the
//!   generation is still active, retrying on the new one otherwise.
//! - A failed build or start leaves the active generation untouched.
//! - Updates are applied one at a time, in arrival order.
//! - [`Orchestrator::shutdown`] owns the final deadline. Once it begins, a
//!   retirement still waiting on its own grace period hands the generation
//!   over to shutdown and `apply` returns, so nothing waits past the deadline.
//!
//! # Concurrency model
//! One orchestrator task runs [`Orchestrator::run`]. Request handling never
//! takes a lock owned by the orchestrator.
use crate::app::with_tracing;
use crate::reload::config::ConfigGeneration;
use crate::reload::generation::{Generation, GenerationDeps, GenerationError, build_generation};
use crate::reload::lifecycle::{Lifecycle, LifecycleError};
use crate::reload::source::ConfigUpdates;
use arc_swap::ArcSwap;
use axum::Router;
use axum::extract::{Request, State};
use axum::response::Response;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("failed to build generation: {0}")]
    Build(#[from] GenerationError),
    #[error("failed to start generation: {0}")]
    Start(#[from] LifecycleError),
    #[error("gateway is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The update carried the active version.
    Unchanged,
    Activated,
}

/// The swappable reference to the active generation.
pub struct HandlerSwitch {
    current: ArcSwap<Generation>,
}

impl HandlerSwitch {
    fn new(generation: Arc<Generation>) -> Self {
        Self {
            current: ArcSwap::new(generation),
        }
    }

    pub fn active(&self) -> Arc<Generation> {
        self.current.load_full()
    }

    fn replace(&self, next: Arc<Generation>) -> Arc<Generation> {
        self.current.swap(next)
    }
}

async fn dispatch(State(switch): State<Arc<HandlerSwitch>>, request: Request) -> Response {
    let (generation, _inflight) = loop {
        let generation = switch.active();
        let guard = generation.inflight().enter();
        if Arc::ptr_eq(&generation, &switch.current.load()) {
            break (generation, guard);
        }
    };
    match generation.router().oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

pub struct Orchestrator {
    deps: GenerationDeps,
    switch: Arc<HandlerSwitch>,
    grace: Duration,
    applying: tokio::sync::Mutex<()>,
    closing: CancellationToken,
    /// Replaced generations whose drain has not finished yet.
    retiring: Mutex<Vec<Arc<Generation>>>,
}

impl Orchestrator {
    /// Build and start the first generation. Unlike later updates, a failure
    /// here is returned to the caller.
    pub async fn bootstrap(
        initial: &ConfigGeneration,
        deps: GenerationDeps,
        grace: Duration,
    ) -> Result<Self, ReloadError> {
        let generation = prepare(initial, &deps, grace).await?;
        tracing::info!(version = %generation.version(), "initial generation active");
        metrics::counter!("warden_generation_activations_total").increment(1);
        Ok(Self {
            deps,
            switch: Arc::new(HandlerSwitch::new(Arc::new(generation))),
            grace,
            applying: tokio::sync::Mutex::new(()),
            closing: CancellationToken::new(),
            retiring: Mutex::new(Vec::new()),
        })
    }

    pub fn active_version(&self) -> String {
        self.switch.active().version().to_string()
    }

    pub fn active(&self) -> Arc<Generation> {
        self.switch.active()
    }

    /// The process-level router: dispatches every request to the active
    /// generation.
    pub fn router(&self) -> Router {
        with_tracing(
            Router::new()
                .fallback(dispatch)
                .with_state(Arc::clone(&self.switch)),
        )
    }

    /// Apply one update. Returns once the previous generation has retired or
    /// its grace period has run out.
    pub async fn apply(&self, update: &ConfigGeneration) -> Result<ApplyOutcome, ReloadError> {
        let _applying = self.applying.lock().await;
        if self.closing.is_cancelled() {
            tracing::debug!(version = %update.version(), "ignoring update during shutdown");
            return Err(ReloadError::ShuttingDown);
        }
        let current = self.switch.active();
        if current.version() == update.version() {
            tracing::debug!(version = %update.version(), "configuration unchanged");
            return Ok(ApplyOutcome::Unchanged);
        }
        drop(current);

        let next = match prepare(update, &self.deps, self.grace).await {
            Ok(generation) => Arc::new(generation),
            Err(err) => {
                metrics::counter!("warden_generation_build_failures_total").increment(1);
                tracing::warn!(
                    version = %update.version(),
                    active = %self.active_version(),
                    error = %err,
                    "rejected configuration update; keeping active generation"
                );
                return Err(err);
            }
        };

        if self.closing.is_cancelled() {
            let _ = next.stop(Instant::now() + self.grace).await;
            return Err(ReloadError::ShuttingDown);
        }

        let previous = self.switch.replace(next);
        metrics::counter!("warden_generation_activations_total").increment(1);
        tracing::info!(
            version = %update.version(),
            previous = %previous.version(),
            "generation activated"
        );
        self.retire(previous).await;
        Ok(ApplyOutcome::Activated)
    }

    async fn retire(&self, previous: Arc<Generation>) {
        self.retiring.lock().push(Arc::clone(&previous));
        let deadline = Instant::now() + self.grace;
        let stopped = tokio::select! {
            biased;
            result = previous.stop(deadline) => Some(result),
            _ = self.closing.cancelled() => None,
        };
        let Some(result) = stopped else {
            tracing::info!(
                version = %previous.version(),
                "shutdown started; generation drains under the shutdown deadline"
            );
            return;
        };
        self.retiring
            .lock()
            .retain(|generation| !Arc::ptr_eq(generation, &previous));
        match result {
            Ok(()) => tracing::info!(version = %previous.version(), "generation retired"),
            Err(err) => {
                metrics::counter!("warden_generation_retire_timeouts_total").increment(1);
                tracing::warn!(
                    version = %previous.version(),
                    error = %err,
                    "generation retired with work outstanding"
                );
            }
        }
    }

    /// Apply updates until the queue closes or `cancel` fires.
    pub async fn run(self: Arc<Self>, mut updates: ConfigUpdates, cancel: CancellationToken) {
        loop {
            let update = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                update = updates.next() => update,
            };
            let Some(update) = update else {
                break;
            };
            // Failures are logged inside apply and leave the active generation in place.
            let _ = self.apply(&update).await;
        }
        tracing::debug!("reload orchestrator stopped");
    }

    /// Stop the active generation and any generation still retiring, all
    /// under `deadline`.
    ///
    /// Later calls to [`Orchestrator::apply`] fail with
    /// [`ReloadError::ShuttingDown`]. The first failure is returned; a
    /// generation that still had requests in flight is reported as
    /// [`LifecycleError::DeadlineExceeded`].
    pub async fn shutdown(&self, deadline: Instant) -> Result<(), LifecycleError> {
        self.closing.cancel();
        let _applying = tokio::time::timeout_at(deadline, self.applying.lock())
            .await
            .map_err(|_| LifecycleError::StopTimeout {
                component: "reload orchestrator".to_string(),
            })?;
        let active = self.switch.active();
        let retiring = std::mem::take(&mut *self.retiring.lock());
        tracing::info!(
            version = %active.version(),
            retiring = retiring.len(),
            "stopping generations"
        );

        let mut outcome = Ok(());
        for generation in retiring.iter().chain(std::iter::once(&active)) {
            let Err(err) = generation.stop(deadline).await else {
                continue;
            };
            if outcome.is_ok() {
                outcome = Err(err);
            } else {
                tracing::warn!(
                    version = %generation.version(),
                    error = %err,
                    "generation stopped with errors"
                );
            }
        }
        outcome
    }
}

async fn prepare(
    config: &ConfigGeneration,
    deps: &GenerationDeps,
    grace: Duration,
) -> Result<Generation, ReloadError> {
    let generation = build_generation(config, deps)?;
    if let Err(err) = generation.start().await {
        let _ = generation.stop(Instant::now() + grace).await;
        return Err(err.into());
    }
    Ok(generation)
}
