//! Binds jobs to workers and calls their execution RPC.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use dpip_core::config::DispatchConfig;
use dpip_core::{Job, Worker, WorkerId};
use dpip_eisenbahn::execution::{FilterReply, FilterRequest};
use dpip_eisenbahn::{topics, EisenbahnError, Message, RequestSender, Transport, ZmqRequestClient};

use crate::error::DispatchError;
use crate::ingestion::Ingestion;
use crate::registry::WorkerRegistry;

/// Least-loaded worker, ties broken by the lowest id.
pub fn select_worker(workers: &[Worker]) -> Option<&Worker> {
    workers.iter().min_by_key(|w| (w.load, w.id))
}

/// Calls a worker's execution RPC.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn execute(
        &self,
        worker: &Worker,
        request: FilterRequest,
        timeout: Duration,
    ) -> Result<FilterReply, DispatchError>;
}

/// [`ExecutionClient`] over DEALER sockets, one per worker endpoint.
#[derive(Default)]
pub struct ZmqExecutionClient {
    clients: Mutex<HashMap<String, Arc<ZmqRequestClient>>>,
}

impl ZmqExecutionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached client for the worker's endpoint, connecting on a miss.
    ///
    /// The cache lock is not held while connecting, so a worker that does
    /// not answer never holds up calls to other workers.
    async fn client_for(&self, worker: &Worker) -> Result<Arc<ZmqRequestClient>, EisenbahnError> {
        if let Some(client) = self.clients.lock().await.get(&worker.rpc_endpoint) {
            return Ok(Arc::clone(client));
        }
        let transport = Transport::from_endpoint(&worker.rpc_endpoint)?;
        let client = Arc::new(ZmqRequestClient::connect(&transport).await?);
        let mut clients = self.clients.lock().await;
        let cached = clients
            .entry(worker.rpc_endpoint.clone())
            .or_insert(client);
        Ok(Arc::clone(cached))
    }

    async fn call(&self, worker: &Worker, request: &FilterRequest, timeout: Duration) -> Result<Message, EisenbahnError> {
        let client = self.client_for(worker).await?;
        let msg = Message::new(topics::WORKER_EXECUTE, request)?;
        client.request(msg, timeout).await
    }
}

#[async_trait]
impl ExecutionClient for ZmqExecutionClient {
    async fn execute(
        &self,
        worker: &Worker,
        request: FilterRequest,
        timeout: Duration,
    ) -> Result<FilterReply, DispatchError> {
        let worker_id = worker.id;
        let rpc = |source: EisenbahnError| DispatchError::Rpc { worker_id, source };

        // The bound covers the connect too: zeromq retries a refused
        // connect forever.
        let outcome = tokio::time::timeout(timeout, self.call(worker, &request, timeout))
            .await
            .unwrap_or(Err(EisenbahnError::Timeout(timeout)));
        match outcome {
            Ok(reply) => reply.decode::<FilterReply>().map_err(|e| rpc(e.into())),
            Err(EisenbahnError::Timeout(timeout)) => Err(DispatchError::Timeout { worker_id, timeout }),
            Err(e) => {
                // Reconnect on the next call.
                self.clients.lock().await.remove(&worker.rpc_endpoint);
                Err(rpc(e))
            }
        }
    }
}

/// A job that ran to completion on a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub worker_id: WorkerId,
    pub reply: FilterReply,
}

pub struct Dispatcher {
    registry: Arc<WorkerRegistry>,
    client: Arc<dyn ExecutionClient>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(registry: Arc<WorkerRegistry>, client: Arc<dyn ExecutionClient>, config: DispatchConfig) -> Self {
        Self {
            registry,
            client,
            config,
        }
    }

    /// One attempt: snapshot, select, call, wait for the reply.
    pub async fn dispatch(&self, job: &Job) -> Result<Dispatched, DispatchError> {
        let workers = self.registry.snapshot().await;
        let worker = select_worker(&workers).ok_or(DispatchError::NoWorkersAvailable)?;
        debug!(worker_id = worker.id, load = worker.load, image_id = job.image_id, "worker selected");

        let reply = self
            .client
            .execute(worker, FilterRequest::from(job), self.config.rpc_timeout())
            .await?;
        if !reply.success {
            return Err(DispatchError::Failed {
                worker_id: worker.id,
                message: reply.message,
            });
        }
        Ok(Dispatched {
            worker_id: worker.id,
            reply,
        })
    }

    /// [`dispatch`](Self::dispatch), re-queuing with backoff while no
    /// worker is registered. Failed executions are never retried.
    pub async fn dispatch_with_retry(&self, job: &Job) -> Result<Dispatched, DispatchError> {
        let mut attempt = 0;
        loop {
            match self.dispatch(job).await {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff = self.config.backoff_for(attempt);
                    debug!(image_id = job.image_id, attempt, ?backoff, "no workers, requeueing job");
                    tokio::time::sleep(backoff).await;
                }
                result => return result,
            }
        }
    }

    /// Consume the job queue until shutdown.
    ///
    /// Each job runs in its own task so a slow worker never holds up the
    /// queue. Outcomes are reported to `ingestion`.
    pub async fn run(
        self: Arc<Self>,
        mut jobs: mpsc::Receiver<Job>,
        ingestion: Arc<Ingestion>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("dispatcher started");
        loop {
            tokio::select! {
                job = jobs.recv() => {
                    let Some(job) = job else { break };
                    let dispatcher = Arc::clone(&self);
                    let ingestion = Arc::clone(&ingestion);
                    tokio::spawn(async move {
                        match dispatcher.dispatch_with_retry(&job).await {
                            Ok(done) => info!(
                                worker_id = done.worker_id,
                                image_id = job.image_id,
                                filter = %job.filter,
                                message = %done.reply.message,
                                "job completed"
                            ),
                            Err(DispatchError::NoWorkersAvailable) => {
                                warn!(image_id = job.image_id, "no workers available, job dropped")
                            }
                            Err(e) => error!(image_id = job.image_id, error = %e, "job failed"),
                        }
                        ingestion.complete_job(&job).await;
                    });
                }
                changed = shutdown.changed() => {
                    // A dropped sender also means shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("dispatcher stopped");
    }
}
