//! The worker's execution RPC surface.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use dpip_core::{FilterKind, ImageId};
use dpip_eisenbahn::execution::{FilterReply, FilterRequest};
use dpip_eisenbahn::{topics, Message, RequestHandler};

use crate::error::AgentError;

/// One method per supported filter. Each returns the id of the filtered
/// image it uploaded.
#[async_trait]
pub trait FilterRpc: Send + Sync {
    async fn grayscale(&self, image_id: ImageId) -> Result<ImageId, AgentError>;
    async fn blur(&self, image_id: ImageId) -> Result<ImageId, AgentError>;
}

/// Route a request to the matching filter method. Every failure, including
/// an unknown filter name, is reported in the reply.
pub async fn route(rpc: &dyn FilterRpc, request: &FilterRequest) -> FilterReply {
    let filter = match request.filter.parse::<FilterKind>() {
        Ok(filter) => filter,
        Err(e) => return FilterReply::failed(e.to_string()),
    };
    let Some(image_id) = request.image_id() else {
        let err = AgentError::InvalidRequest(format!("image id '{}' is not a number", request.image_id));
        return FilterReply::failed(err.to_string());
    };

    let result = match filter {
        FilterKind::Grayscale => rpc.grayscale(image_id).await,
        FilterKind::Blur => rpc.blur(image_id).await,
    };
    match result {
        Ok(filtered_id) => FilterReply::ok(filtered_id),
        Err(e) => {
            warn!(%filter, image_id, error = %e, "filter call failed");
            FilterReply::failed(e.to_string())
        }
    }
}

/// Answer execution requests until shutdown. Requests are handled
/// concurrently, one task each.
pub async fn serve(server: Arc<dyn RequestHandler>, rpc: Arc<dyn FilterRpc>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let received = tokio::select! {
            r = server.recv_request() => r,
            changed = shutdown.changed() => {
                // A dropped sender also means shutdown.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        let (token, msg) = match received {
            Ok(r) => r,
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "dropping malformed execution frame");
                continue;
            }
            Err(e) => {
                error!(error = %e, "execution channel failed");
                break;
            }
        };

        let server = Arc::clone(&server);
        let rpc = Arc::clone(&rpc);
        tokio::spawn(async move {
            let reply = match msg.decode::<FilterRequest>() {
                Ok(request) => route(rpc.as_ref(), &request).await,
                Err(e) => FilterReply::failed(format!("malformed request: {e}")),
            };
            let reply = match Message::with_correlation(topics::WORKER_EXECUTE_REPLY, &reply, msg.correlation_id) {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, "cannot encode execution reply");
                    return;
                }
            };
            if let Err(e) = server.send_reply(token, reply).await {
                warn!(error = %e, "failed to send execution reply");
            }
        });
    }
    debug!("execution server stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns the input id plus 100, and counts calls.
    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FilterRpc for Echo {
        async fn grayscale(&self, image_id: ImageId) -> Result<ImageId, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(image_id + 100)
        }

        async fn blur(&self, _image_id: ImageId) -> Result<ImageId, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::NotRegistered)
        }
    }

    /// A channel on which no request ever arrives.
    struct Quiet;

    #[async_trait]
    impl RequestHandler for Quiet {
        async fn recv_request(&self) -> Result<(dpip_eisenbahn::ReplyToken, Message), dpip_eisenbahn::EisenbahnError> {
            std::future::pending().await
        }

        async fn send_reply(&self, _token: dpip_eisenbahn::ReplyToken, _reply: Message) -> Result<(), dpip_eisenbahn::EisenbahnError> {
            Ok(())
        }
    }

    fn request(filter: &str, image_id: &str) -> FilterRequest {
        FilterRequest {
            filter: filter.into(),
            image_id: image_id.into(),
        }
    }

    #[tokio::test]
    async fn routes_by_filter_name() {
        let rpc = Echo::default();
        let reply = route(&rpc, &request("grayscale", "5")).await;
        assert!(reply.success);
        assert_eq!(reply.filtered_image_id, Some(105));

        let reply = route(&rpc, &request("blur", "5")).await;
        assert!(!reply.success);
        assert_eq!(reply.filtered_image_id, None);
        assert_eq!(rpc.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bad_requests_never_reach_a_filter() {
        let rpc = Echo::default();
        assert!(!route(&rpc, &request("sepia", "5")).await.success);
        assert!(!route(&rpc, &request("grayscale", "")).await.success);
        assert_eq!(rpc.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn serve_stops_when_the_shutdown_sender_is_dropped() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(serve(Arc::new(Quiet), Arc::new(Echo::default()), shutdown_rx));
        drop(shutdown_tx);
        tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("serve kept running without a shutdown sender")
            .unwrap();
    }
}
