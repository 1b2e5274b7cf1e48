use dpip_eisenbahn::EisenbahnError;

/// Errors talking to the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-2xx status.
    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The gateway answered 2xx but the body or headers made no sense.
    #[error("unexpected gateway response: {0}")]
    Decode(String),

    #[error("event publish failed: {0}")]
    Publish(#[from] EisenbahnError),
}
