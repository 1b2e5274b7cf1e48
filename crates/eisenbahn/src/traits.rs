use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::EisenbahnError;
use crate::message::Message;
use crate::reqrep::ReplyToken;

/// Sends work items through a PUSH/PULL pipeline.
///
/// PUSH preserves per-sender ordering, so events from one producer are
/// received in the order they were sent.
#[async_trait]
pub trait PipelineSender: Send + Sync {
    /// Push a message into the pipeline.
    async fn send(&self, message: Message) -> Result<(), EisenbahnError>;
}

/// Blanket implementation so `Arc<dyn PipelineSender>` can be used directly.
#[async_trait]
impl<T: PipelineSender + ?Sized> PipelineSender for Arc<T> {
    async fn send(&self, message: Message) -> Result<(), EisenbahnError> {
        (**self).send(message).await
    }
}

/// Receives work items from a PUSH/PULL pipeline.
#[async_trait]
pub trait PipelineReceiver: Send + Sync {
    /// Pull the next message from the pipeline. Blocks until available.
    async fn recv(&self) -> Result<Message, EisenbahnError>;

    /// Pull the next raw frame without decoding the envelope.
    async fn recv_frame(&self) -> Result<Vec<u8>, EisenbahnError>;
}

/// Client side of a request/reply channel.
#[async_trait]
pub trait RequestSender: Send + Sync {
    /// Send a request and wait for the reply carrying the same correlation id.
    ///
    /// Returns [`EisenbahnError::Timeout`] when no reply arrives in time.
    async fn request(&self, msg: Message, timeout: Duration) -> Result<Message, EisenbahnError>;
}

/// Server side of a request/reply channel.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Receive the next request and the token needed to answer it.
    async fn recv_request(&self) -> Result<(ReplyToken, Message), EisenbahnError>;

    /// Answer the request identified by `token`.
    async fn send_reply(&self, token: ReplyToken, reply: Message) -> Result<(), EisenbahnError>;
}
