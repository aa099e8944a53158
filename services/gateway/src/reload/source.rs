//! Delivery of configuration updates to the orchestrator.
//!
//! Updates travel through a bounded queue: producers push validated
//! [`ConfigGeneration`]s, the orchestrator consumes them one at a time. The
//! file watcher is one producer; tests push directly.
use crate::reload::config::{ConfigError, ConfigGeneration, content_hash};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Create a bounded update queue holding at most `capacity` pending updates.
pub fn config_channel(capacity: usize) -> (ConfigPublisher, ConfigUpdates) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ConfigPublisher { tx }, ConfigUpdates { rx })
}

#[derive(Debug, Clone)]
pub struct ConfigPublisher {
    tx: mpsc::Sender<ConfigGeneration>,
}

impl ConfigPublisher {
    /// Queue an update, waiting for space. Fails once the consumer is gone.
    pub async fn publish(
        &self,
        generation: ConfigGeneration,
    ) -> Result<(), mpsc::error::SendError<ConfigGeneration>> {
        self.tx.send(generation).await
    }
}

#[derive(Debug)]
pub struct ConfigUpdates {
    rx: mpsc::Receiver<ConfigGeneration>,
}

impl ConfigUpdates {
    /// Next update, or `None` once every publisher is dropped.
    pub async fn next(&mut self) -> Option<ConfigGeneration> {
        self.rx.recv().await
    }
}

/// Polls a YAML file and publishes a new generation whenever its content
/// changes.
#[derive(Debug)]
pub struct FileConfigSource {
    path: PathBuf,
    interval: Duration,
    last_hash: Option<String>,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            last_hash: None,
        }
    }

    /// Read and parse the file unconditionally. Used for the initial
    /// generation, where a broken file is fatal.
    pub async fn load(&mut self) -> Result<ConfigGeneration, ConfigError> {
        let raw = self.read().await?;
        self.last_hash = Some(content_hash(&raw));
        ConfigGeneration::parse(&raw)
    }

    /// Returns `Ok(None)` when the content has not changed since the last read.
    pub async fn poll_once(&mut self) -> Result<Option<ConfigGeneration>, ConfigError> {
        let raw = self.read().await?;
        let hash = content_hash(&raw);
        if self.last_hash.as_deref() == Some(hash.as_str()) {
            return Ok(None);
        }
        // Remember broken content too so it is reported once per edit.
        self.last_hash = Some(hash);
        ConfigGeneration::parse(&raw).map(Some)
    }

    async fn read(&self) -> Result<String, ConfigError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ConfigError::Read {
                path: self.path.display().to_string(),
                source,
            })
    }

    /// Poll until `cancel` fires or the consumer goes away.
    pub fn spawn(
        mut self,
        publisher: ConfigPublisher,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the initial content was
            // already loaded.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match self.poll_once().await {
                    Ok(None) => {}
                    Ok(Some(generation)) => {
                        tracing::info!(
                            path = %self.path.display(),
                            version = generation.version(),
                            "runtime configuration changed"
                        );
                        if publisher.publish(generation).await.is_err() {
                            tracing::debug!("configuration consumer closed");
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            path = %self.path.display(),
                            error = %err,
                            "ignoring unreadable runtime configuration"
                        );
                    }
                }
            }
            tracing::debug!(path = %self.path.display(), "configuration watcher stopped");
        })
    }
}
