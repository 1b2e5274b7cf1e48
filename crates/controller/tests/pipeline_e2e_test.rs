//! Upload to filtered result, through real sockets and HTTP.
//!
//! The in-memory gateway is served over HTTP and publishes its events to
//! the controller; a worker agent joins over ZeroMQ and does the filtering.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;

use dpip_controller::{Controller, ZmqExecutionClient};
use dpip_core::{DpipConfig, ImageKind, Workload};
use dpip_eisenbahn::{RequestHandler, Transport, ZmqRequestClient, ZmqRequestServer};
use dpip_gateway::{fake, EventPublisher, Gateway, GatewayError, GatewayFactory, HttpGateway, MemoryGateway};
use dpip_worker::{serve, FilterRpc, FixedLoad, ImageFilters, WorkerAgent};

fn png() -> Vec<u8> {
    let img = image::RgbImage::from_fn(8, 8, |x, y| {
        if (x + y) % 2 == 0 {
            image::Rgb([255, 0, 0])
        } else {
            image::Rgb([0, 0, 255])
        }
    });
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn uploaded_image_is_filtered_by_a_registered_worker() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gateway_url = format!("http://{}", listener.local_addr().unwrap());

    let mut config = DpipConfig::default();
    config.channels.workloads = "tcp://127.0.0.1:17000".into();
    config.channels.images = "tcp://127.0.0.1:17001".into();
    config.channels.registry = "tcp://127.0.0.1:17002".into();
    config.channels.dispatcher = "tcp://127.0.0.1:17003".into();
    config.gateway.base_url = gateway_url.clone();
    config.dispatch.rpc_timeout_ms = 5_000;
    config.worker.name = "w1".into();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller = Controller::start(
        &config,
        Arc::new(HttpGateway::new(&gateway_url, config.gateway.timeout()).unwrap()),
        Arc::new(ZmqExecutionClient::new()),
        shutdown_rx.clone(),
    )
    .await
    .unwrap();

    let publisher = EventPublisher::connect(
        &Transport::from_endpoint(&config.channels.workloads).unwrap(),
        &Transport::from_endpoint(&config.channels.images).unwrap(),
    )
    .await
    .unwrap();
    let memory = Arc::new(MemoryGateway::with_publisher(publisher));
    fake::spawn_on(listener, Arc::clone(&memory)).unwrap();

    // Worker.
    let rpc_endpoint = "tcp://127.0.0.1:17030";
    let server = ZmqRequestServer::bind(&Transport::from_endpoint(rpc_endpoint).unwrap())
        .await
        .unwrap();
    let registry_client = ZmqRequestClient::connect(&Transport::from_endpoint(&config.channels.registry).unwrap())
        .await
        .unwrap();
    let timeout = config.gateway.timeout();
    let gateways: GatewayFactory = Arc::new(move |url: &str| -> Result<Arc<dyn Gateway>, GatewayError> {
        Ok(Arc::new(HttpGateway::new(url, timeout)?) as Arc<dyn Gateway>)
    });
    let agent = Arc::new(WorkerAgent::new(
        config.worker.clone(),
        rpc_endpoint,
        Arc::new(registry_client),
        Arc::new(FixedLoad(1)),
        Arc::new(ImageFilters::new(2.0)),
        gateways,
    ));
    let server: Arc<dyn RequestHandler> = Arc::new(server);
    let rpc: Arc<dyn FilterRpc> = agent.clone();
    tokio::spawn(serve(server, rpc, shutdown_rx));

    assert_eq!(agent.join_cluster().await.unwrap(), 0);
    let workers = controller.registry.snapshot().await;
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].rpc_endpoint, rpc_endpoint);
    assert!(memory.is_valid_token(&workers[0].token).await);

    // User side: a workload and one upload.
    memory.put_workload(Workload::new(3, "holidays", "blur")).await.unwrap();
    let original = memory.upload_original(3, Bytes::from(png())).await.unwrap();

    eventually("the filtered upload", || {
        let memory = Arc::clone(&memory);
        async move { memory.workload(3).await.is_some_and(|w| w.image_ids.len() == 2) }
    })
    .await;
    let image_ids = memory.workload(3).await.unwrap().image_ids;
    assert_eq!(image_ids[0], original);
    let (kind, bytes) = memory.image(image_ids[1]).await.unwrap();
    assert_eq!(kind, ImageKind::Filtered);
    assert!(image::load_from_memory(&bytes).is_ok());

    eventually("the job to be reported finished", || {
        let ingestion = Arc::clone(&controller.ingestion);
        async move {
            ingestion
                .workload(3)
                .await
                .is_some_and(|w| w.image_ids.len() == 2 && w.running_jobs == 0)
        }
    })
    .await;

    // The filtered image re-announced the workload but must not loop.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(memory.workload(3).await.unwrap().image_ids.len(), 2);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), controller.join())
        .await
        .unwrap();
}
