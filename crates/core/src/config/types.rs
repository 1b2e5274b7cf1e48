use serde::{Deserialize, Serialize};

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration shared by the controller and worker processes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DpipConfig {
    /// ZeroMQ endpoints the controller binds and workers dial.
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Where the HTTP gateway lives.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Worker admission and liveness.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Job hand-off and execution RPC behaviour.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Settings for a worker process.
    #[serde(default)]
    pub worker: WorkerAgentConfig,

    /// Optional controller status endpoint.
    #[serde(default)]
    pub status: StatusConfig,
}

// ── Section configs ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// PULL endpoint receiving workload events from the gateway.
    #[serde(default = "default_workloads_endpoint")]
    pub workloads: String,

    /// PULL endpoint receiving image events from the gateway.
    #[serde(default = "default_images_endpoint")]
    pub images: String,

    /// ROUTER endpoint where workers join and report load.
    #[serde(default = "default_registry_endpoint")]
    pub registry: String,

    /// PULL endpoint accepting externally submitted jobs.
    #[serde(default = "default_dispatcher_endpoint")]
    pub dispatcher: String,
}

fn default_workloads_endpoint() -> String {
    "tcp://127.0.0.1:40899".into()
}

fn default_images_endpoint() -> String {
    "tcp://127.0.0.1:40900".into()
}

fn default_registry_endpoint() -> String {
    "tcp://127.0.0.1:40901".into()
}

fn default_dispatcher_endpoint() -> String {
    "tcp://127.0.0.1:40902".into()
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            workloads: default_workloads_endpoint(),
            images: default_images_endpoint(),
            registry: default_registry_endpoint(),
            dispatcher: default_dispatcher_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL handed to workers as their `api_endpoint`.
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

fn default_gateway_url() -> String {
    "http://localhost:8080".into()
}

fn default_gateway_timeout() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            timeout_secs: default_gateway_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Evict workers not heard from for this long. 0 disables eviction.
    #[serde(default = "default_worker_ttl")]
    pub worker_ttl_secs: u64,

    /// How often the eviction sweep runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_worker_ttl() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    5
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            worker_ttl_secs: default_worker_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Execution RPC timeout, covering fetch + filter + upload on the worker.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Requeue attempts for jobs that found no worker. 0 drops them at once.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first requeue; doubles on each further attempt.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Capacity of the in-process job queue between ingestion and dispatch.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_rpc_timeout() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: default_rpc_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerAgentConfig {
    /// Name the worker registers under.
    #[serde(default = "default_worker_name")]
    pub name: String,

    /// Host advertised in the worker's RPC endpoint.
    #[serde(default = "default_rpc_host")]
    pub rpc_host: String,

    /// First port tried when no explicit port is set.
    #[serde(default = "default_rpc_base_port")]
    pub rpc_base_port: u16,

    /// Fixed RPC port; when unset the first free port from the base is used.
    pub rpc_port: Option<u16>,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// How long to wait for the registry's join reply before giving up.
    #[serde(default = "default_join_timeout")]
    pub join_timeout_secs: u64,

    /// Gaussian sigma for the blur filter.
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
}

fn default_worker_name() -> String {
    "hard-worker".into()
}

fn default_rpc_host() -> String {
    "127.0.0.1".into()
}

fn default_rpc_base_port() -> u16 {
    50051
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_join_timeout() -> u64 {
    10
}

fn default_blur_sigma() -> f32 {
    10.0
}

impl Default for WorkerAgentConfig {
    fn default() -> Self {
        Self {
            name: default_worker_name(),
            rpc_host: default_rpc_host(),
            rpc_base_port: default_rpc_base_port(),
            rpc_port: None,
            heartbeat_interval_secs: default_heartbeat_interval(),
            join_timeout_secs: default_join_timeout(),
            blur_sigma: default_blur_sigma(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusConfig {
    /// HTTP port for `/status`, `/workers` and `/workloads`. Unset = disabled.
    pub port: Option<u16>,

    /// Name reported as `system_name` in `/status`.
    #[serde(default)]
    pub system_name: Option<String>,
}
