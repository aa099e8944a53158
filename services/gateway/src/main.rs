//! Warden gateway entry point.
//!
//! # Purpose
//! Wires process configuration, the cluster client factory, the runtime
//! configuration watcher and the reload orchestrator, then serves the
//! orchestrator's router until shutdown.
//!
//! # Notes
//! Shutdown is bounded by the configured grace period. A final generation that
//! does not drain in time is returned as an error so the process exits
//! non-zero.
use anyhow::Context;
use gateway::config::GatewayConfig;
use gateway::oauth2::cookies::CookieSettings;
use gateway::oauth2::provider::OidcProviderFactory;
use gateway::observability;
use gateway::reload::generation::GenerationDeps;
use gateway::reload::lifecycle::LifecycleError;
use gateway::reload::orchestrator::Orchestrator;
use gateway::reload::source::{FileConfigSource, config_channel};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use warden_authz::{KubeClientFactory, KubeClientSettings};

const UPDATE_QUEUE_CAPACITY: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env_or_yaml().context("gateway config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn build_deps(config: &GatewayConfig) -> anyhow::Result<GenerationDeps> {
    let token = match &config.kube_token_file {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("read cluster token {}", path.display()))?
                .trim()
                .to_string(),
        ),
        None => None,
    };
    let ca_pem = match &config.kube_ca_file {
        Some(path) => Some(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("read cluster ca {}", path.display()))?,
        ),
        None => None,
    };
    let client_factory = KubeClientFactory::new(KubeClientSettings {
        base_url: config.kube_api_url.clone(),
        token,
        ca_pem,
        timeout: config.request_timeout(),
    })
    .context("build cluster client factory")?;
    Ok(GenerationDeps {
        client_factory: Arc::new(client_factory),
        provider_factory: Arc::new(OidcProviderFactory),
        cookies: if config.insecure_cookies {
            CookieSettings::insecure()
        } else {
            CookieSettings::default()
        },
        request_timeout: config.request_timeout(),
    })
}

async fn run_with_shutdown<F>(config: GatewayConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("warden-gateway");
    let deps = build_deps(&config).await?;

    let mut source = FileConfigSource::new(&config.runtime_config, config.config_poll_interval());
    let initial = source
        .load()
        .await
        .context("load initial runtime configuration")?;
    let orchestrator = Arc::new(
        Orchestrator::bootstrap(&initial, deps, config.shutdown_grace())
            .await
            .context("start initial generation")?,
    );

    let metrics_listener = tokio::net::TcpListener::bind(config.metrics_bind)
        .await
        .with_context(|| format!("bind metrics listener {}", config.metrics_bind))?;
    tracing::info!(addr = %config.metrics_bind, "metrics listening");

    let stop = CancellationToken::new();
    let (publisher, updates) = config_channel(UPDATE_QUEUE_CAPACITY);
    let watcher = source.spawn(publisher, stop.child_token());
    let reloader = tokio::spawn(Arc::clone(&orchestrator).run(updates, stop.child_token()));
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        metrics_listener,
        stop.clone().cancelled_owned(),
    ));

    let addr = config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, version = %orchestrator.active_version(), "gateway listening");
    let app = orchestrator.router();
    let server_stop = stop.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(server_stop.cancelled_owned())
            .await
    });

    tokio::pin!(shutdown);
    let exited_early = tokio::select! {
        result = &mut server => Some(result),
        _ = &mut shutdown => None,
    };
    tracing::info!("gateway shutting down");
    let deadline = Instant::now() + config.shutdown_grace();
    stop.cancel();

    let served = match exited_early {
        Some(result) => result,
        None => match tokio::time::timeout_at(deadline, &mut server).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("connections still open at the shutdown deadline");
                server.abort();
                Ok(Ok(()))
            }
        },
    };
    // Draining first makes any in-progress apply return without waiting out
    // its own grace period.
    let drained = orchestrator.shutdown(deadline).await;
    for (name, task) in [("config watcher", watcher), ("reload orchestrator", reloader)] {
        if tokio::time::timeout_at(deadline, task).await.is_err() {
            tracing::warn!(task = name, "background task still running at the shutdown deadline");
        }
    }
    match tokio::time::timeout_at(deadline, metrics_task).await {
        Ok(Ok(Err(err))) => tracing::warn!(error = %err, "metrics listener failed"),
        Err(_) => tracing::warn!("metrics listener still running at the shutdown deadline"),
        _ => {}
    }

    served.context("listener task failed")?.context("serve")?;
    match drained {
        Ok(()) => {
            tracing::info!("gateway stopped");
            Ok(())
        }
        Err(err @ LifecycleError::DeadlineExceeded { .. }) => {
            Err(anyhow::Error::new(err).context("graceful shutdown deadline exceeded"))
        }
        Err(err) => {
            tracing::warn!(error = %err, "final generation stopped with errors");
            Ok(())
        }
    }
}
