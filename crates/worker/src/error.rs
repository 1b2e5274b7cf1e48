use std::time::Duration;

use dpip_eisenbahn::registry::RejectReason;
use dpip_eisenbahn::EisenbahnError;
use dpip_gateway::GatewayError;

/// Image decode or encode failures.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("cannot decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("cannot encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("filter task failed: {0}")]
    Task(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("worker is not registered")]
    NotRegistered,

    #[error("no join reply within {0:?}")]
    JoinTimeout(Duration),

    #[error("registry rejected the request ({reason:?}): {message}")]
    Rejected { reason: RejectReason, message: String },

    #[error("registry channel: {0}")]
    Transport(#[from] EisenbahnError),

    #[error("unexpected registry reply: {0}")]
    Protocol(String),

    #[error("cannot fetch image: {0}")]
    ImageFetch(#[source] GatewayError),

    #[error("cannot upload image: {0}")]
    ImageUpload(#[source] GatewayError),

    #[error("gateway client: {0}")]
    Gateway(#[source] GatewayError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no free port at or above {0}")]
    NoFreePort(u16),
}

impl AgentError {
    /// The registry no longer knows this worker; joining again is the fix.
    pub fn is_eviction(&self) -> bool {
        matches!(
            self,
            AgentError::Rejected {
                reason: RejectReason::UnknownWorker,
                ..
            }
        )
    }
}
