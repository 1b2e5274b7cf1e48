use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::{PullSocket, PushSocket, Socket, SocketRecv, SocketSend};

use crate::error::EisenbahnError;
use crate::message::Message;
use crate::traits::{PipelineReceiver, PipelineSender};
use crate::transport::Transport;

/// PUSH socket sender feeding a downstream PULL receiver.
///
/// The socket stays open for the sender's lifetime; a send returns once
/// the message is queued on the connection, so no delay before close is
/// needed to avoid losing it.
pub struct ZmqPipelineSender {
    socket: Mutex<PushSocket>,
}

impl ZmqPipelineSender {
    /// Create a PUSH sender that connects to a bound PULL receiver.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, EisenbahnError> {
        let mut socket = PushSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting PUSH socket");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Create a PUSH sender that binds, for a stable producer that
    /// receivers connect to.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, EisenbahnError> {
        transport.prepare_bind()?;
        let mut socket = PushSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding PUSH socket");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl PipelineSender for ZmqPipelineSender {
    async fn send(&self, message: Message) -> Result<(), EisenbahnError> {
        let bytes = message.to_bytes()?;
        let mut socket = self.socket.lock().await;
        socket.send(bytes.into()).await?;
        debug!(topic = %message.topic, "pushed message");
        Ok(())
    }
}

/// PULL socket receiver for work items pushed by upstream senders.
pub struct ZmqPipelineReceiver {
    socket: Mutex<PullSocket>,
}

impl ZmqPipelineReceiver {
    /// Create a PULL receiver that binds to the given endpoint.
    ///
    /// The receiver binds because it is the stable side that producers
    /// connect to.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, EisenbahnError> {
        transport.prepare_bind()?;
        let mut socket = PullSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding PULL socket");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Create a PULL receiver that connects to a bound PUSH sender.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, EisenbahnError> {
        let mut socket = PullSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting PULL socket");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl PipelineReceiver for ZmqPipelineReceiver {
    async fn recv(&self) -> Result<Message, EisenbahnError> {
        let frame = self.recv_frame().await?;
        Ok(Message::from_bytes(&frame)?)
    }

    async fn recv_frame(&self) -> Result<Vec<u8>, EisenbahnError> {
        let mut socket = self.socket.lock().await;
        let raw = socket.recv().await?;
        let bytes = raw
            .get(0)
            .ok_or_else(|| EisenbahnError::Transport("empty ZMQ frame".into()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn push_pull_single_message() {
        let transport = Transport::tcp("127.0.0.1", 15600);

        // Receiver binds first (stable endpoint)
        let receiver = ZmqPipelineReceiver::bind(&transport).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sender = ZmqPipelineSender::connect(&transport).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let msg = Message::new("pipeline.test", &"hello pipeline".to_string()).unwrap();
        let correlation_id = msg.correlation_id;
        sender.send(msg).await.unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.topic, "pipeline.test");
        assert_eq!(received.correlation_id, correlation_id);
        assert_eq!(received.decode::<String>().unwrap(), "hello pipeline");
    }

    #[tokio::test]
    async fn raw_frame_is_returned_undecoded() {
        let transport = Transport::tcp("127.0.0.1", 15601);
        let receiver = ZmqPipelineReceiver::bind(&transport).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut raw = PushSocket::new();
        raw.connect(&transport.endpoint()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        raw.send(br#"{"id":1}"#.to_vec().into()).await.unwrap();

        let frame = receiver.recv_frame().await.unwrap();
        assert_eq!(frame, br#"{"id":1}"#.to_vec());
    }
}
