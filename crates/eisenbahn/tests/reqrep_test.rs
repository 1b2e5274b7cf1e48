//! Integration tests for DEALER/ROUTER request/reply.
//!
//! Tests verify correlation-id matching, concurrent requests answered out
//! of order, timeouts, and the registry payloads end to end.

use std::sync::Arc;
use std::time::Duration;

use dpip_eisenbahn::registry::{JoinReply, JoinRequest, RegistryReply, RegistryRequest};
use dpip_eisenbahn::transport::Transport;
use dpip_eisenbahn::{
    topics, EisenbahnError, Message, RequestHandler, RequestSender, ZmqRequestClient,
    ZmqRequestServer,
};

const SETTLE: Duration = Duration::from_millis(200);
const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn join_request_reply() {
    let transport = Transport::tcp("127.0.0.1", 16500);

    let server = ZmqRequestServer::bind(&transport).await.unwrap();
    tokio::time::sleep(SETTLE).await;
    let client = ZmqRequestClient::connect(&transport).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let join = RegistryRequest::Join(JoinRequest {
        name: "w1".into(),
        load: 0,
        rpc_endpoint: "tcp://127.0.0.1:50051".into(),
    });
    let request_msg = Message::new(topics::REGISTRY_JOIN, &join).unwrap();
    let cid = request_msg.correlation_id;

    let server_handle = tokio::spawn(async move {
        let (token, msg) = server.recv_request().await.unwrap();
        assert_eq!(msg.topic, topics::REGISTRY_JOIN);
        let RegistryRequest::Join(req) = msg.decode().unwrap() else {
            panic!("expected join");
        };
        assert_eq!(req.name, "w1");

        let reply = RegistryReply::Joined(JoinReply {
            id: 0,
            token: "T".into(),
            api_endpoint: "http://localhost:8080".into(),
        });
        let reply = Message::with_correlation(topics::REGISTRY_REPLY, &reply, msg.correlation_id).unwrap();
        server.send_reply(token, reply).await.unwrap();
    });

    let reply = client.request(request_msg, TIMEOUT).await.unwrap();
    assert_eq!(reply.correlation_id, cid);
    match reply.decode::<RegistryReply>().unwrap() {
        RegistryReply::Joined(joined) => {
            assert_eq!(joined.id, 0);
            assert_eq!(joined.token, "T");
        }
        other => panic!("expected joined, got {other:?}"),
    }

    server_handle.await.unwrap();
}

#[tokio::test]
async fn replies_sent_out_of_order_reach_their_callers() {
    let transport = Transport::tcp("127.0.0.1", 16510);

    let server = Arc::new(ZmqRequestServer::bind(&transport).await.unwrap());
    tokio::time::sleep(SETTLE).await;
    let client = Arc::new(ZmqRequestClient::connect(&transport).await.unwrap());
    tokio::time::sleep(SETTLE).await;

    let num_requests = 5u32;

    // Each request gets its own handler that sleeps inversely to its value,
    // so later requests are answered first while the server keeps receiving.
    let srv = Arc::clone(&server);
    let server_handle = tokio::spawn(async move {
        let mut handlers = Vec::new();
        for _ in 0..num_requests {
            let (token, msg) = srv.recv_request().await.unwrap();
            let srv = Arc::clone(&srv);
            handlers.push(tokio::spawn(async move {
                let value: u32 = msg.decode().unwrap();
                tokio::time::sleep(Duration::from_millis(u64::from(num_requests - value) * 40)).await;
                let reply = Message::with_correlation("dpip.test.echo.reply", &(value * 10), msg.correlation_id).unwrap();
                srv.send_reply(token, reply).await.unwrap();
            }));
        }
        for h in handlers {
            h.await.unwrap();
        }
    });

    let mut handles = Vec::new();
    for i in 0..num_requests {
        let c = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            let msg = Message::new("dpip.test.echo", &i).unwrap();
            let cid = msg.correlation_id;
            let reply = c.request(msg, TIMEOUT).await.unwrap();
            assert_eq!(reply.correlation_id, cid);
            assert_eq!(reply.decode::<u32>().unwrap(), i * 10);
        }));
    }

    for h in handles {
        h.await.unwrap();
    }
    server_handle.await.unwrap();
}

#[tokio::test]
async fn request_timeout() {
    let transport = Transport::tcp("127.0.0.1", 16520);

    // Bind server but never reply
    let _server = ZmqRequestServer::bind(&transport).await.unwrap();
    tokio::time::sleep(SETTLE).await;
    let client = ZmqRequestClient::connect(&transport).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let msg = Message::new(topics::WORKER_EXECUTE, &"hello".to_string()).unwrap();
    let short_timeout = Duration::from_millis(300);

    match client.request(msg, short_timeout).await {
        Err(EisenbahnError::Timeout(d)) => assert_eq!(d, short_timeout),
        other => panic!("expected Timeout error, got: {other:?}"),
    }

    // The client stays usable after a timeout.
    let msg = Message::new(topics::WORKER_EXECUTE, &"again".to_string()).unwrap();
    assert!(matches!(
        client.request(msg, short_timeout).await,
        Err(EisenbahnError::Timeout(_))
    ));
}

#[tokio::test]
async fn reply_survives_dropping_the_server() {
    let transport = Transport::tcp("127.0.0.1", 16530);

    let server = ZmqRequestServer::bind(&transport).await.unwrap();
    tokio::time::sleep(SETTLE).await;
    let client = ZmqRequestClient::connect(&transport).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let server_handle = tokio::spawn(async move {
        let (token, msg) = server.recv_request().await.unwrap();
        let reply = RegistryReply::Ack { message: "ok".into() };
        let reply = Message::with_correlation(topics::REGISTRY_REPLY, &reply, msg.correlation_id).unwrap();
        server.send_reply(token, reply).await.unwrap();
        drop(server);
    });

    let request = Message::new(topics::REGISTRY_HEARTBEAT, &"load").unwrap();
    let reply = client.request(request, TIMEOUT).await.unwrap();
    assert!(matches!(reply.decode::<RegistryReply>().unwrap(), RegistryReply::Ack { .. }));
    server_handle.await.unwrap();
}

#[tokio::test]
async fn connect_within_gives_up_on_a_silent_endpoint() {
    // Bind then release a port so nothing listens on it.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let transport = Transport::tcp("127.0.0.1", port);

    let started = std::time::Instant::now();
    let result = ZmqRequestClient::connect_within(&transport, Duration::from_millis(200)).await;
    // A refused connect either errors or times out; it never hangs.
    if let Err(e) = result {
        assert!(matches!(e, EisenbahnError::Timeout(_) | EisenbahnError::Zmq(_)), "{e}");
    }
    assert!(started.elapsed() < Duration::from_secs(2));
}
