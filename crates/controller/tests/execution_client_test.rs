//! Execution calls against workers that are gone or slow to appear.

use std::sync::Arc;
use std::time::Duration;

use dpip_controller::{DispatchError, Dispatcher, ExecutionClient, WorkerRegistry, ZmqExecutionClient};
use dpip_core::config::DispatchConfig;
use dpip_core::{Job, Worker};
use dpip_eisenbahn::execution::{FilterReply, FilterRequest};
use dpip_eisenbahn::{topics, Message, RequestHandler, Transport, ZmqRequestServer};
use dpip_gateway::MemoryGateway;

/// A loopback endpoint nothing listens on.
fn dead_endpoint() -> String {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    format!("tcp://127.0.0.1:{port}")
}

fn worker(id: u64, rpc_endpoint: &str) -> Worker {
    Worker {
        id,
        name: format!("w{id}"),
        token: "T".into(),
        load: 0,
        rpc_endpoint: rpc_endpoint.into(),
        api_endpoint: "http://localhost:8080".into(),
    }
}

fn request(image_id: u64) -> FilterRequest {
    FilterRequest {
        filter: "blur".into(),
        image_id: image_id.to_string(),
    }
}

/// Answer every request with a success naming `filtered_id`.
async fn spawn_worker(endpoint: &str, filtered_id: u64) {
    let server = ZmqRequestServer::bind(&Transport::from_endpoint(endpoint).unwrap())
        .await
        .unwrap();
    tokio::spawn(async move {
        while let Ok((token, msg)) = server.recv_request().await {
            let reply = Message::with_correlation(
                topics::WORKER_EXECUTE_REPLY,
                &FilterReply::ok(filtered_id),
                msg.correlation_id,
            )
            .unwrap();
            server.send_reply(token, reply).await.unwrap();
        }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn dispatch_to_a_dead_worker_times_out() {
    let registry = Arc::new(WorkerRegistry::new(Arc::new(MemoryGateway::new()), "http://gw"));
    registry.register("gone", &dead_endpoint(), 0).await.unwrap();
    let config = DispatchConfig {
        rpc_timeout_ms: 200,
        ..DispatchConfig::default()
    };
    let dispatcher = Dispatcher::new(registry, Arc::new(ZmqExecutionClient::new()), config);

    let outcome = tokio::time::timeout(Duration::from_secs(5), dispatcher.dispatch(&Job::new("blur", 5)))
        .await
        .expect("dispatch must honour the RPC timeout");
    assert!(matches!(outcome, Err(DispatchError::Timeout { worker_id: 0, .. })), "{outcome:?}");
}

#[tokio::test]
async fn dead_worker_does_not_hold_up_a_live_one() {
    let live = "tcp://127.0.0.1:17910";
    spawn_worker(live, 42).await;

    let client = Arc::new(ZmqExecutionClient::new());
    let dead = {
        let client = Arc::clone(&client);
        let endpoint = dead_endpoint();
        tokio::spawn(async move {
            client
                .execute(&worker(0, &endpoint), request(1), Duration::from_secs(3))
                .await
        })
    };
    // Let the dead call start connecting first.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reply = tokio::time::timeout(
        Duration::from_secs(2),
        client.execute(&worker(1, live), request(2), Duration::from_secs(2)),
    )
    .await
    .expect("live worker call waited behind the dead one")
    .unwrap();
    assert!(reply.success);
    assert_eq!(reply.filtered_image_id, Some(42));

    assert!(matches!(dead.await.unwrap(), Err(DispatchError::Timeout { worker_id: 0, .. }) | Err(DispatchError::Rpc { .. })));
}
