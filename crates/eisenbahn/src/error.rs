use thiserror::Error;

/// Errors that can occur in the eisenbahn messaging layer.
#[derive(Debug, Error)]
pub enum EisenbahnError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A frame arrived that could not be decoded into the expected payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// The background task owning the socket has exited.
    #[error("socket event loop closed")]
    Closed,
}

impl EisenbahnError {
    /// Whether the error concerns a single message rather than the socket.
    ///
    /// Receive loops log and skip these instead of shutting down.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EisenbahnError::Deserialization(_)
                | EisenbahnError::Protocol(_)
                | EisenbahnError::Transport(_)
        )
    }
}
