use std::path::Path;
use std::time::Duration;

use crate::error::DpipError;

use super::helpers::{env_opt, env_parsed};
use super::types::{DispatchConfig, DpipConfig, GatewayConfig, RegistryConfig, WorkerAgentConfig};

impl DpipConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, DpipError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DpipError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Load from `path` when it exists, otherwise start from defaults.
    /// Environment overrides apply either way.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DpipError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::from_file(path);
        }
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        let mut config = Self::local();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Single-host defaults: every channel on loopback TCP.
    pub fn local() -> Self {
        Self::default()
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `DPIP_SECTION_KEY` overrides `section.key`, e.g.
    /// `DPIP_CHANNELS_REGISTRY` or `DPIP_DISPATCH_RPC_TIMEOUT_MS`.
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_opt("DPIP_CHANNELS_WORKLOADS") {
            self.channels.workloads = v;
        }
        if let Some(v) = env_opt("DPIP_CHANNELS_IMAGES") {
            self.channels.images = v;
        }
        if let Some(v) = env_opt("DPIP_CHANNELS_REGISTRY") {
            self.channels.registry = v;
        }
        if let Some(v) = env_opt("DPIP_CHANNELS_DISPATCHER") {
            self.channels.dispatcher = v;
        }
        if let Some(v) = env_opt("DPIP_GATEWAY_BASE_URL") {
            self.gateway.base_url = v;
        }
        if let Some(v) = env_parsed("DPIP_GATEWAY_TIMEOUT_SECS") {
            self.gateway.timeout_secs = v;
        }
        if let Some(v) = env_parsed("DPIP_REGISTRY_WORKER_TTL_SECS") {
            self.registry.worker_ttl_secs = v;
        }
        if let Some(v) = env_parsed("DPIP_REGISTRY_SWEEP_INTERVAL_SECS") {
            self.registry.sweep_interval_secs = v;
        }
        if let Some(v) = env_parsed("DPIP_DISPATCH_RPC_TIMEOUT_MS") {
            self.dispatch.rpc_timeout_ms = v;
        }
        if let Some(v) = env_parsed("DPIP_DISPATCH_MAX_RETRIES") {
            self.dispatch.max_retries = v;
        }
        if let Some(v) = env_parsed("DPIP_DISPATCH_RETRY_BACKOFF_MS") {
            self.dispatch.retry_backoff_ms = v;
        }
        if let Some(v) = env_opt("DPIP_WORKER_NAME") {
            self.worker.name = v;
        }
        if let Some(v) = env_opt("DPIP_WORKER_RPC_HOST") {
            self.worker.rpc_host = v;
        }
        if let Some(v) = env_parsed("DPIP_WORKER_RPC_BASE_PORT") {
            self.worker.rpc_base_port = v;
        }
        if let Some(v) = env_parsed("DPIP_WORKER_RPC_PORT") {
            self.worker.rpc_port = Some(v);
        }
        if let Some(v) = env_parsed("DPIP_WORKER_HEARTBEAT_INTERVAL_SECS") {
            self.worker.heartbeat_interval_secs = v;
        }
        if let Some(v) = env_parsed("DPIP_STATUS_PORT") {
            self.status.port = Some(v);
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  channels:  workloads={}, images={}", self.channels.workloads, self.channels.images);
        tracing::info!("             registry={}, dispatcher={}", self.channels.registry, self.channels.dispatcher);
        tracing::info!("  gateway:   base_url={}", self.gateway.base_url);
        tracing::info!("  registry:  worker_ttl={}s, sweep={}s", self.registry.worker_ttl_secs, self.registry.sweep_interval_secs);
        tracing::info!("  dispatch:  rpc_timeout={}ms, max_retries={}", self.dispatch.rpc_timeout_ms, self.dispatch.max_retries);
        tracing::info!(
            "  status:    port={}",
            self.status.port.map(|p| p.to_string()).unwrap_or_else(|| "(disabled)".into())
        );
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RegistryConfig {
    /// `None` when eviction is disabled.
    pub fn worker_ttl(&self) -> Option<Duration> {
        (self.worker_ttl_secs > 0).then(|| Duration::from_secs(self.worker_ttl_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl DispatchConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Backoff before requeue attempt `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

impl WorkerAgentConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}
