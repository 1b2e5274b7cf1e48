use std::time::Duration;

use dpip_core::{DpipError, WorkerId};
use dpip_eisenbahn::EisenbahnError;

/// Failures of registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("worker {0} is not registered")]
    UnknownWorker(WorkerId),

    /// The gateway refused or garbled the login. No id was consumed.
    #[error("credential issuance failed: {0}")]
    CredentialIssuance(String),
}

/// Failures of a single dispatch attempt.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no workers available")]
    NoWorkersAvailable,

    #[error("worker {worker_id} did not reply within {timeout:?}")]
    Timeout { worker_id: WorkerId, timeout: Duration },

    #[error("execution RPC to worker {worker_id} failed: {source}")]
    Rpc {
        worker_id: WorkerId,
        #[source]
        source: EisenbahnError,
    },

    /// The worker replied, but reported a failure.
    #[error("worker {worker_id} failed the job: {message}")]
    Failed { worker_id: WorkerId, message: String },
}

impl DispatchError {
    /// Only an empty registry is worth retrying; a job never runs twice.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::NoWorkersAvailable)
    }
}

/// Errors that stop the controller from starting.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] DpipError),

    #[error("cannot bind {channel} channel: {source}")]
    Bind {
        channel: &'static str,
        #[source]
        source: EisenbahnError,
    },

    #[error("status server: {0}")]
    Status(#[from] std::io::Error),
}
