//! Request/reply infrastructure using ZeroMQ DEALER/ROUTER sockets.
//!
//! Provides typed, correlation-id-matched request/reply over ZeroMQ:
//! - [`ZmqRequestClient`] wraps a DEALER socket for sending requests
//! - [`ZmqRequestServer`] wraps a ROUTER socket for receiving and replying
//! - [`ReplyToken`] is an opaque handle carrying the ZMQ identity frame
//!
//! Both sides hand their socket to a background task, so sends and
//! receives never wait on each other. A server can therefore have many
//! requests in flight and answer them in any order.
//!
//! ## Framing (zeromq-rs 0.4)
//!
//! zeromq-rs ROUTER pushes peer identity as first frame on recv and pops it
//! on send. DEALER sends/receives raw application frames. So:
//! - DEALER sends: `[topic, envelope]`
//! - ROUTER receives: `[identity, topic, envelope]`
//! - ROUTER sends: `[identity, topic, envelope]`
//! - DEALER receives: `[topic, envelope]`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeromq::prelude::*;
use zeromq::{DealerSocket, RouterSocket, ZmqMessage};

use crate::error::EisenbahnError;
use crate::message::Message;
use crate::traits::{RequestHandler, RequestSender};
use crate::transport::Transport;

/// Bound on queued outbound frames per socket.
const SEND_QUEUE: usize = 256;

/// Opaque token carrying the ZMQ routing identity bytes.
///
/// When the ROUTER receives a request, it extracts the peer identity frame.
/// This token must be passed back to [`ZmqRequestServer::send_reply`] so the
/// reply is routed to the correct DEALER client.
#[derive(Debug, Clone)]
pub struct ReplyToken {
    identity: Vec<u8>,
}

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Message>>>>;

/// ZeroMQ DEALER-socket client for issuing requests and awaiting replies.
///
/// The DEALER socket is owned entirely by a background task that alternates
/// between sending outbound requests (received via an mpsc channel) and
/// receiving inbound replies (dispatched by `correlation_id`).
pub struct ZmqRequestClient {
    send_tx: mpsc::Sender<ZmqMessage>,
    pending: PendingMap,
    loop_handle: JoinHandle<()>,
}

impl ZmqRequestClient {
    /// Connect a DEALER socket to a ROUTER endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, EisenbahnError> {
        let mut socket = DealerSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting DEALER socket");
        socket.connect(&endpoint).await?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (send_tx, send_rx) = mpsc::channel::<ZmqMessage>(SEND_QUEUE);

        let loop_pending = Arc::clone(&pending);
        let loop_handle = tokio::spawn(async move {
            Self::event_loop(socket, send_rx, loop_pending).await;
        });

        Ok(Self {
            send_tx,
            pending,
            loop_handle,
        })
    }

    /// [`connect`](Self::connect), giving up after `timeout`.
    ///
    /// zeromq keeps retrying a refused TCP connect, so a peer that is not
    /// listening would otherwise never return.
    pub async fn connect_within(transport: &Transport, timeout: Duration) -> Result<Self, EisenbahnError> {
        tokio::time::timeout(timeout, Self::connect(transport))
            .await
            .map_err(|_| EisenbahnError::Timeout(timeout))?
    }

    async fn event_loop(
        mut socket: DealerSocket,
        mut send_rx: mpsc::Receiver<ZmqMessage>,
        pending: PendingMap,
    ) {
        loop {
            tokio::select! {
                cmd = send_rx.recv() => {
                    let Some(zmq_msg) = cmd else { break };
                    if let Err(e) = socket.send(zmq_msg).await {
                        warn!(error = %e, "DEALER send failed");
                    }
                }
                result = socket.recv() => {
                    match result {
                        Ok(zmq_msg) => Self::dispatch_reply(&pending, zmq_msg).await,
                        Err(e) => {
                            debug!(error = %e, "DEALER recv loop ending");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Route an inbound reply to the caller waiting on its correlation id.
    async fn dispatch_reply(pending: &Mutex<HashMap<Uuid, oneshot::Sender<Message>>>, zmq_msg: ZmqMessage) {
        let frames: Vec<_> = zmq_msg.iter().collect();

        // Skip leading empty delimiter frames.
        let data_frames: Vec<_> = frames
            .iter()
            .skip_while(|f| f.as_ref().is_empty())
            .collect();

        if data_frames.len() < 2 {
            warn!(
                raw_frame_count = frames.len(),
                data_frame_count = data_frames.len(),
                "unexpected frame count on DEALER recv"
            );
            return;
        }

        let message = match Message::from_bytes(data_frames[1].as_ref()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to decode reply envelope");
                return;
            }
        };

        let cid = message.correlation_id;
        match pending.lock().await.remove(&cid) {
            Some(tx) => {
                let _ = tx.send(message);
            }
            // The caller already gave up; a late reply is dropped.
            None => debug!(correlation_id = %cid, "received reply for unknown correlation_id"),
        }
    }
}

impl Drop for ZmqRequestClient {
    fn drop(&mut self) {
        self.loop_handle.abort();
    }
}

#[async_trait]
impl RequestSender for ZmqRequestClient {
    async fn request(&self, msg: Message, timeout_dur: Duration) -> Result<Message, EisenbahnError> {
        let cid = msg.correlation_id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(cid, tx);

        let envelope_bytes = msg.to_bytes()?;
        let mut zmq_msg = ZmqMessage::from(msg.topic.as_str());
        zmq_msg.push_back(envelope_bytes.into());

        if self.send_tx.send(zmq_msg).await.is_err() {
            self.pending.lock().await.remove(&cid);
            return Err(EisenbahnError::Closed);
        }
        debug!(correlation_id = %cid, topic = %msg.topic, "sent request");

        match tokio::time::timeout(timeout_dur, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(EisenbahnError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&cid);
                Err(EisenbahnError::Timeout(timeout_dur))
            }
        }
    }
}

type Inbound = Result<(ReplyToken, Message), EisenbahnError>;

/// A reply frame and the channel that reports whether the socket took it.
type Outbound = (ZmqMessage, oneshot::Sender<Result<(), EisenbahnError>>);

/// ZeroMQ ROUTER-socket server for receiving requests and sending replies.
///
/// A background task owns the ROUTER socket. Requests are handed out by
/// [`recv_request`](RequestHandler::recv_request) and replies go out through
/// [`send_reply`](RequestHandler::send_reply), which may be called from any
/// task while further requests are being received. `send_reply` returns once
/// the socket has written the reply, so dropping the server afterwards does
/// not lose it.
pub struct ZmqRequestServer {
    inbound: Mutex<mpsc::Receiver<Inbound>>,
    reply_tx: mpsc::Sender<Outbound>,
    loop_handle: JoinHandle<()>,
}

impl ZmqRequestServer {
    /// Bind a ROUTER socket on the given transport endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, EisenbahnError> {
        transport.prepare_bind()?;
        let mut socket = RouterSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding ROUTER socket");
        socket.bind(&endpoint).await?;

        let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(SEND_QUEUE);
        let (reply_tx, reply_rx) = mpsc::channel::<Outbound>(SEND_QUEUE);
        let loop_handle = tokio::spawn(Self::event_loop(socket, reply_rx, inbound_tx));

        Ok(Self {
            inbound: Mutex::new(inbound_rx),
            reply_tx,
            loop_handle,
        })
    }

    async fn event_loop(
        mut socket: RouterSocket,
        mut reply_rx: mpsc::Receiver<Outbound>,
        inbound_tx: mpsc::Sender<Inbound>,
    ) {
        loop {
            tokio::select! {
                Some((zmq_msg, ack)) = reply_rx.recv() => {
                    let sent = socket.send(zmq_msg).await.map_err(EisenbahnError::Zmq);
                    if let Err(e) = &sent {
                        warn!(error = %e, "ROUTER send failed");
                    }
                    let _ = ack.send(sent);
                }
                result = socket.recv() => {
                    let inbound = match result {
                        Ok(zmq_msg) => Self::parse_request(zmq_msg),
                        Err(e) => {
                            debug!(error = %e, "ROUTER recv loop ending");
                            let _ = inbound_tx.send(Err(EisenbahnError::Zmq(e))).await;
                            break;
                        }
                    };
                    if inbound_tx.send(inbound).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Split `[identity, topic, envelope]` into a token and the decoded message.
    fn parse_request(zmq_msg: ZmqMessage) -> Inbound {
        let frames: Vec<_> = zmq_msg.iter().collect();

        if frames.len() < 2 {
            return Err(EisenbahnError::Transport(format!(
                "expected at least 2 frames from ROUTER, got {}",
                frames.len()
            )));
        }

        let identity = frames[0].as_ref().to_vec();

        // Skip identity and any empty delimiter frames to find [topic, envelope].
        let data_frames: Vec<_> = frames[1..]
            .iter()
            .skip_while(|f| f.as_ref().is_empty())
            .collect();

        if data_frames.len() < 2 {
            return Err(EisenbahnError::Transport(format!(
                "expected [topic, envelope] after identity, got {} data frames",
                data_frames.len()
            )));
        }

        let message = Message::from_bytes(data_frames[1].as_ref())?;
        debug!(
            correlation_id = %message.correlation_id,
            topic = %message.topic,
            "received request"
        );
        Ok((ReplyToken { identity }, message))
    }
}

impl Drop for ZmqRequestServer {
    fn drop(&mut self) {
        self.loop_handle.abort();
    }
}

#[async_trait]
impl RequestHandler for ZmqRequestServer {
    async fn recv_request(&self) -> Result<(ReplyToken, Message), EisenbahnError> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(Err(EisenbahnError::Closed))
    }

    async fn send_reply(&self, token: ReplyToken, reply: Message) -> Result<(), EisenbahnError> {
        let envelope_bytes = reply.to_bytes()?;

        let mut zmq_msg = ZmqMessage::from(token.identity);
        zmq_msg.push_back(reply.topic.as_bytes().to_vec().into());
        zmq_msg.push_back(envelope_bytes.into());

        let (ack_tx, ack_rx) = oneshot::channel();
        self.reply_tx
            .send((zmq_msg, ack_tx))
            .await
            .map_err(|_| EisenbahnError::Closed)?;
        ack_rx.await.map_err(|_| EisenbahnError::Closed)??;

        debug!(
            correlation_id = %reply.correlation_id,
            topic = %reply.topic,
            "sent reply"
        );
        Ok(())
    }
}
