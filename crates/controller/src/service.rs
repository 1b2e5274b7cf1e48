//! Wires the sockets to the registry, ingestion and dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use dpip_core::{DpipConfig, Job};
use dpip_eisenbahn::ingest::{ImageEvent, WorkloadEvent};
use dpip_eisenbahn::registry::{RegistryReply, RegistryRequest, RejectReason};
use dpip_eisenbahn::{
    topics, EisenbahnError, Message, PipelineReceiver, RequestHandler, Transport, ZmqPipelineReceiver,
    ZmqRequestServer,
};
use dpip_gateway::Gateway;

use crate::dispatcher::{Dispatcher, ExecutionClient};
use crate::error::ControllerError;
use crate::ingestion::Ingestion;
use crate::registry::WorkerRegistry;
use crate::status::{spawn_status_server, StatusState};

/// Entry point for a controller process.
pub struct Controller;

/// A running controller.
pub struct ControllerHandle {
    pub registry: Arc<WorkerRegistry>,
    pub ingestion: Arc<Ingestion>,
    /// Address of the status endpoint, when enabled.
    pub status_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControllerHandle {
    /// Wait for every service loop to stop.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "controller task panicked");
            }
        }
    }
}

async fn bind_pull(channel: &'static str, endpoint: &str) -> Result<ZmqPipelineReceiver, ControllerError> {
    let bind = async {
        let transport = Transport::from_endpoint(endpoint)?;
        ZmqPipelineReceiver::bind(&transport).await
    };
    bind.await.map_err(|source| ControllerError::Bind { channel, source })
}

impl Controller {
    /// Bind every channel, then spawn the service loops.
    ///
    /// Any bind failure is returned before a single loop starts. The loops
    /// run until `shutdown` turns true.
    pub async fn start(
        config: &DpipConfig,
        gateway: Arc<dyn Gateway>,
        client: Arc<dyn ExecutionClient>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ControllerHandle, ControllerError> {
        config.validate()?;
        let channels = &config.channels;

        let registry_server = async {
            let transport = Transport::from_endpoint(&channels.registry)?;
            ZmqRequestServer::bind(&transport).await
        }
        .await
        .map_err(|source| ControllerError::Bind { channel: "registry", source })?;
        let workloads = bind_pull("workloads", &channels.workloads).await?;
        let images = bind_pull("images", &channels.images).await?;
        let submitted = bind_pull("dispatcher", &channels.dispatcher).await?;

        let registry = Arc::new(WorkerRegistry::new(gateway, config.gateway.base_url.clone()));
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>(config.dispatch.queue_capacity);
        let ingestion = Arc::new(Ingestion::new(jobs_tx.clone()));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), client, config.dispatch.clone()));

        let status_listener = match config.status.port {
            Some(port) => Some(tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?),
            None => None,
        };

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(registration_loop(
            registry_server,
            Arc::clone(&registry),
            shutdown.clone(),
        )));

        let ing = Arc::clone(&ingestion);
        tasks.push(tokio::spawn(event_loop::<WorkloadEvent, _, _>(
            "workloads",
            workloads,
            shutdown.clone(),
            move |event| {
                let ing = Arc::clone(&ing);
                async move {
                    ing.on_workload_event(event).await;
                }
            },
        )));

        let ing = Arc::clone(&ingestion);
        tasks.push(tokio::spawn(event_loop::<ImageEvent, _, _>(
            "images",
            images,
            shutdown.clone(),
            move |image| {
                let ing = Arc::clone(&ing);
                async move {
                    ing.on_image_event(image).await;
                }
            },
        )));

        tasks.push(tokio::spawn(event_loop::<Job, _, _>(
            "dispatcher",
            submitted,
            shutdown.clone(),
            move |job| {
                let jobs = jobs_tx.clone();
                async move {
                    info!(filter = %job.filter, image_id = job.image_id, "job submitted");
                    if jobs.send(job).await.is_err() {
                        warn!("dispatcher queue closed, submitted job dropped");
                    }
                }
            },
        )));

        if let Some(ttl) = config.registry.worker_ttl() {
            let registry = Arc::clone(&registry);
            let interval = config.registry.sweep_interval();
            let mut shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let evicted = registry.evict_stale(ttl).await;
                            if !evicted.is_empty() {
                                info!(?evicted, "liveness sweep");
                            }
                        }
                        changed = shutdown.changed() => {
                            // A dropped sender also means shutdown.
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        tasks.push(tokio::spawn(dispatcher.run(jobs_rx, Arc::clone(&ingestion), shutdown.clone())));

        let mut status_addr = None;
        if let Some(listener) = status_listener {
            status_addr = listener.local_addr().ok();
            let state = StatusState {
                system_name: config
                    .status
                    .system_name
                    .clone()
                    .unwrap_or_else(|| "dpip".to_string()),
                registry: Arc::clone(&registry),
                ingestion: Arc::clone(&ingestion),
            };
            tasks.push(spawn_status_server(listener, state, shutdown));
        }

        info!("controller started");
        Ok(ControllerHandle {
            registry,
            ingestion,
            status_addr,
            tasks,
        })
    }
}

/// Serve the registration channel. Each request is handled in its own
/// task, so a slow gateway login does not stall heartbeats.
async fn registration_loop(
    server: ZmqRequestServer,
    registry: Arc<WorkerRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let server = Arc::new(server);
    loop {
        let received = tokio::select! {
            r = server.recv_request() => r,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        let (token, msg) = match received {
            Ok(r) => r,
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "dropping malformed registry frame");
                continue;
            }
            Err(e) => {
                error!(error = %e, "registration channel failed");
                break;
            }
        };

        let server = Arc::clone(&server);
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let reply = match msg.decode::<RegistryRequest>() {
                Ok(request) => registry.handle(request).await,
                Err(e) => {
                    warn!(topic = %msg.topic, error = %e, "malformed registry request");
                    RegistryReply::rejected(RejectReason::Malformed, e.to_string())
                }
            };
            let reply = match Message::with_correlation(topics::REGISTRY_REPLY, &reply, msg.correlation_id) {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, "cannot encode registry reply");
                    return;
                }
            };
            if let Err(e) = server.send_reply(token, reply).await {
                warn!(error = %e, "failed to send registry reply");
            }
        });
    }
    debug!("registration loop stopped");
}

/// Pull frames from `receiver`, decode each as `T` and hand it to `handle`.
/// Undecodable frames are logged and dropped.
async fn event_loop<T, F, Fut>(
    channel: &'static str,
    receiver: ZmqPipelineReceiver,
    mut shutdown: watch::Receiver<bool>,
    handle: F,
) where
    T: DeserializeOwned + Send,
    F: Fn(T) -> Fut + Send,
    Fut: std::future::Future<Output = ()> + Send,
{
    loop {
        let frame = tokio::select! {
            f = receiver.recv_frame() => f,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(EisenbahnError::Zmq(e)) => {
                error!(channel, error = %e, "ingest channel failed");
                break;
            }
            Err(e) => {
                warn!(channel, error = %e, "receive failed");
                continue;
            }
        };
        match Message::decode_frame::<T>(&frame) {
            Ok(item) => handle(item).await,
            Err(e) => warn!(channel, error = %e, bytes = frame.len(), "dropping malformed event"),
        }
    }
    debug!(channel, "ingest loop stopped");
}
