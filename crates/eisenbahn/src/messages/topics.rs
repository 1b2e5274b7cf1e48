//! Topic constants.
//!
//! Topics follow the pattern `dpip.<domain>.<event>`.

// ── Ingest ────────────────────────────────────────────────────────────────

/// Full workload record pushed by the gateway after any change.
pub const WORKLOAD_EVENT: &str = "dpip.ingest.workload";

/// Image metadata pushed by the gateway after an upload.
pub const IMAGE_EVENT: &str = "dpip.ingest.image";

/// Job submitted straight to the dispatcher.
pub const DISPATCH_JOB: &str = "dpip.dispatch.job";

// ── Registry ──────────────────────────────────────────────────────────────

pub const REGISTRY_JOIN: &str = "dpip.registry.join";
pub const REGISTRY_HEARTBEAT: &str = "dpip.registry.heartbeat";
pub const REGISTRY_REPLY: &str = "dpip.registry.reply";

// ── Execution ─────────────────────────────────────────────────────────────

pub const WORKER_EXECUTE: &str = "dpip.worker.execute";
pub const WORKER_EXECUTE_REPLY: &str = "dpip.worker.execute.reply";
