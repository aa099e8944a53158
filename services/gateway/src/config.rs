use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 30_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_KUBE_API_URL: &str = "https://kubernetes.default.svc";

// Process configuration sourced from environment variables. Static for the
// life of the process; the reloadable part lives in `runtime_config`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub runtime_config: PathBuf,
    pub config_poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    pub insecure_cookies: bool,
    pub kube_api_url: String,
    pub kube_token_file: Option<PathBuf>,
    pub kube_ca_file: Option<PathBuf>,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct GatewayConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    runtime_config: Option<PathBuf>,
    config_poll_interval_ms: Option<u64>,
    shutdown_grace_ms: Option<u64>,
    insecure_cookies: Option<bool>,
    kube_api_url: Option<String>,
    kube_token_file: Option<PathBuf>,
    kube_ca_file: Option<PathBuf>,
    request_timeout_ms: Option<u64>,
}

fn env_millis(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("WARDEN_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9080".to_string())
            .parse()
            .with_context(|| "parse WARDEN_BIND")?;
        let metrics_bind = std::env::var("WARDEN_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .with_context(|| "parse WARDEN_METRICS_BIND")?;
        let runtime_config = std::env::var("WARDEN_RUNTIME_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_default();
        let insecure_cookies = std::env::var("WARDEN_INSECURE_COOKIES")
            .ok()
            .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Ok(Self {
            bind_addr,
            metrics_bind,
            runtime_config,
            config_poll_interval_ms: env_millis(
                "WARDEN_CONFIG_POLL_INTERVAL_MS",
                DEFAULT_CONFIG_POLL_INTERVAL_MS,
            ),
            shutdown_grace_ms: env_millis("WARDEN_SHUTDOWN_GRACE_MS", DEFAULT_SHUTDOWN_GRACE_MS),
            insecure_cookies,
            kube_api_url: std::env::var("WARDEN_KUBE_API_URL")
                .unwrap_or_else(|_| DEFAULT_KUBE_API_URL.to_string()),
            kube_token_file: std::env::var("WARDEN_KUBE_TOKEN_FILE").ok().map(PathBuf::from),
            kube_ca_file: std::env::var("WARDEN_KUBE_CA_FILE").ok().map(PathBuf::from),
            request_timeout_ms: env_millis("WARDEN_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("WARDEN_GATEWAY_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read WARDEN_GATEWAY_CONFIG: {path}"))?;
            let override_cfg: GatewayConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse gateway config yaml")?;
            if let Some(value) = override_cfg.bind_addr {
                config.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.runtime_config {
                config.runtime_config = value;
            }
            if let Some(value) = override_cfg.config_poll_interval_ms
                && value > 0
            {
                config.config_poll_interval_ms = value;
            }
            if let Some(value) = override_cfg.shutdown_grace_ms
                && value > 0
            {
                config.shutdown_grace_ms = value;
            }
            if let Some(value) = override_cfg.insecure_cookies {
                config.insecure_cookies = value;
            }
            if let Some(value) = override_cfg.kube_api_url {
                config.kube_api_url = value;
            }
            if let Some(value) = override_cfg.kube_token_file {
                config.kube_token_file = Some(value);
            }
            if let Some(value) = override_cfg.kube_ca_file {
                config.kube_ca_file = Some(value);
            }
            if let Some(value) = override_cfg.request_timeout_ms
                && value > 0
            {
                config.request_timeout_ms = value;
            }
        }
        if config.runtime_config.as_os_str().is_empty() {
            bail!("WARDEN_RUNTIME_CONFIG is required");
        }
        Ok(config)
    }

    pub fn config_poll_interval(&self) -> Duration {
        Duration::from_millis(self.config_poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
