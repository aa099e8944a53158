//! Start/stop contract for generation-owned resources, plus in-flight tracking.
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The retiring generation still had work when the grace period ended.
    #[error("generation {version} did not drain in time ({in_flight} requests in flight)")]
    DeadlineExceeded { version: String, in_flight: usize },
    #[error("{component} did not stop before the deadline")]
    StopTimeout { component: String },
    #[error("{component} failed to start: {reason}")]
    Start { component: String, reason: String },
}

/// A resource with background work that must be started after construction
/// and stopped before it is dropped.
///
/// `stop` must return by `deadline`; work still pending at that point is
/// reported as an error, never waited on.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn start(&self) -> Result<(), LifecycleError>;
    async fn stop(&self, deadline: Instant) -> Result<(), LifecycleError>;
}

/// Counts requests currently executing against one generation.
#[derive(Debug, Default)]
pub struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        metrics::gauge!("warden_active_generation_inflight").increment(1.0);
        InFlightGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolve once no request is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the
            // await is not missed.
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub struct InFlightGuard {
    tracker: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        metrics::gauge!("warden_active_generation_inflight").decrement(1.0);
        if self.tracker.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn idle_resolves_immediately_without_requests() {
        let inflight = Arc::new(InFlight::default());
        tokio::time::timeout(Duration::from_secs(1), inflight.wait_idle())
            .await
            .expect("idle");
    }

    #[tokio::test]
    async fn idle_waits_for_last_guard() {
        let inflight = Arc::new(InFlight::default());
        let first = inflight.enter();
        let second = inflight.enter();
        assert_eq!(inflight.count(), 2);

        let waiter = {
            let inflight = inflight.clone();
            tokio::spawn(async move { inflight.wait_idle().await })
        };
        drop(first);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("idle after last guard")
            .expect("join");
        assert_eq!(inflight.count(), 0);
    }

    #[test]
    fn deadline_error_names_version_and_count() {
        let err = LifecycleError::DeadlineExceeded {
            version: "v2".to_string(),
            in_flight: 3,
        };
        assert_eq!(
            err.to_string(),
            "generation v2 did not drain in time (3 requests in flight)"
        );
    }
}
