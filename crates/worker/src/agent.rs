//! Registration, heartbeats and filter execution for one worker process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, instrument, warn};

use dpip_core::config::WorkerAgentConfig;
use dpip_core::{FilterKind, ImageId, ImageKind, WorkerId};
use dpip_eisenbahn::registry::{JoinRequest, LoadReport, RegistryReply, RegistryRequest};
use dpip_eisenbahn::{topics, EisenbahnError, Message, RequestSender};
use dpip_gateway::{Gateway, GatewayFactory};

use crate::error::{AgentError, FilterError};
use crate::filters::FilterEngine;
use crate::load::LoadSampler;
use crate::rpc::FilterRpc;

/// What the agent is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Unregistered,
    Registering,
    Registered,
    /// Registered with at least one filter call in progress.
    Executing,
}

/// Identity handed out by the registry.
#[derive(Clone)]
struct Session {
    id: WorkerId,
    token: String,
    gateway: Arc<dyn Gateway>,
}

enum Phase {
    Unregistered,
    Registering,
    Registered(Session),
}

/// Counts a filter call for as long as it lives.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct WorkerAgent {
    config: WorkerAgentConfig,
    rpc_endpoint: String,
    registry: Arc<dyn RequestSender>,
    sampler: Arc<dyn LoadSampler>,
    filters: Arc<dyn FilterEngine>,
    gateways: GatewayFactory,
    phase: RwLock<Phase>,
    in_flight: AtomicUsize,
}

impl WorkerAgent {
    /// `registry` is a client of the controller's registration channel.
    /// `gateways` builds the gateway client once the registry names it.
    pub fn new(
        config: WorkerAgentConfig,
        rpc_endpoint: impl Into<String>,
        registry: Arc<dyn RequestSender>,
        sampler: Arc<dyn LoadSampler>,
        filters: Arc<dyn FilterEngine>,
        gateways: GatewayFactory,
    ) -> Self {
        Self {
            config,
            rpc_endpoint: rpc_endpoint.into(),
            registry,
            sampler,
            filters,
            gateways,
            phase: RwLock::new(Phase::Unregistered),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub async fn status(&self) -> AgentStatus {
        match &*self.phase.read().await {
            Phase::Unregistered => AgentStatus::Unregistered,
            Phase::Registering => AgentStatus::Registering,
            Phase::Registered(_) if self.in_flight.load(Ordering::SeqCst) > 0 => AgentStatus::Executing,
            Phase::Registered(_) => AgentStatus::Registered,
        }
    }

    /// The id assigned by the registry, once registered.
    pub async fn worker_id(&self) -> Option<WorkerId> {
        self.session().await.map(|s| s.id)
    }

    pub fn rpc_endpoint(&self) -> &str {
        &self.rpc_endpoint
    }

    async fn session(&self) -> Option<Session> {
        match &*self.phase.read().await {
            Phase::Registered(session) => Some(session.clone()),
            _ => None,
        }
    }

    async fn call_registry<T: Serialize>(
        &self,
        topic: &str,
        request: &T,
        timeout: Duration,
    ) -> Result<RegistryReply, AgentError> {
        let msg = Message::new(topic, request).map_err(EisenbahnError::from)?;
        let reply = self.registry.request(msg, timeout).await?;
        reply
            .decode::<RegistryReply>()
            .map_err(|e| AgentError::Protocol(e.to_string()))
    }

    /// Register with the controller and wait for an id and token.
    ///
    /// The caller treats an error as fatal at startup; the agent is left
    /// unregistered.
    #[instrument(skip(self), fields(name = %self.config.name, rpc_endpoint = %self.rpc_endpoint))]
    pub async fn join_cluster(&self) -> Result<WorkerId, AgentError> {
        *self.phase.write().await = Phase::Registering;
        match self.try_join().await {
            Ok(session) => {
                let id = session.id;
                *self.phase.write().await = Phase::Registered(session);
                info!(worker_id = id, "joined cluster");
                Ok(id)
            }
            Err(e) => {
                *self.phase.write().await = Phase::Unregistered;
                Err(e)
            }
        }
    }

    async fn try_join(&self) -> Result<Session, AgentError> {
        let request = RegistryRequest::Join(JoinRequest {
            name: self.config.name.clone(),
            load: self.sampler.sample(),
            rpc_endpoint: self.rpc_endpoint.clone(),
        });
        let timeout = self.config.join_timeout();
        let reply = match self.call_registry(topics::REGISTRY_JOIN, &request, timeout).await {
            Err(AgentError::Transport(EisenbahnError::Timeout(d))) => return Err(AgentError::JoinTimeout(d)),
            other => other?,
        };
        match reply {
            RegistryReply::Joined(joined) => {
                let gateway = (self.gateways)(&joined.api_endpoint).map_err(AgentError::Gateway)?;
                Ok(Session {
                    id: joined.id,
                    token: joined.token,
                    gateway,
                })
            }
            RegistryReply::Rejected { reason, message } => Err(AgentError::Rejected { reason, message }),
            RegistryReply::Ack { .. } => Err(AgentError::Protocol("ack in reply to a join".into())),
        }
    }

    /// Send one load report.
    pub async fn heartbeat(&self) -> Result<(), AgentError> {
        let id = self.worker_id().await.ok_or(AgentError::NotRegistered)?;
        let load = self.sampler.sample();
        let request = RegistryRequest::Heartbeat(LoadReport { id, load });
        match self
            .call_registry(topics::REGISTRY_HEARTBEAT, &request, self.config.heartbeat_interval())
            .await?
        {
            RegistryReply::Ack { message } => {
                debug!(worker_id = id, load, %message, "heartbeat acknowledged");
                Ok(())
            }
            RegistryReply::Rejected { reason, message } => Err(AgentError::Rejected { reason, message }),
            RegistryReply::Joined(_) => Err(AgentError::Protocol("join reply to a heartbeat".into())),
        }
    }

    /// One heartbeat round. An evicted or unregistered agent joins again.
    pub(crate) async fn beat(&self) {
        match self.heartbeat().await {
            Ok(()) => {}
            Err(e) if e.is_eviction() || matches!(e, AgentError::NotRegistered) => {
                warn!(error = %e, "registry does not know this worker, joining again");
                *self.phase.write().await = Phase::Unregistered;
                if let Err(e) = self.join_cluster().await {
                    warn!(error = %e, "re-join failed, retrying on next heartbeat");
                }
            }
            Err(e) => warn!(error = %e, "heartbeat failed"),
        }
    }

    /// Report load every `heartbeat_interval` until shutdown.
    pub async fn run_heartbeat(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
        // The first tick completes immediately; join just reported the load.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.beat().await,
                changed = shutdown.changed() => {
                    // A dropped sender also means shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("heartbeat loop stopped");
    }

    /// Fetch, filter and upload. Returns the id of the uploaded result.
    #[instrument(skip(self))]
    async fn execute_filter(&self, filter: FilterKind, image_id: ImageId) -> Result<ImageId, AgentError> {
        let session = self.session().await.ok_or(AgentError::NotRegistered)?;
        let _in_flight = InFlight::enter(&self.in_flight);

        let fetched = session
            .gateway
            .fetch_image(image_id, &session.token)
            .await
            .map_err(AgentError::ImageFetch)?;

        let filters = Arc::clone(&self.filters);
        let input = fetched.bytes;
        let output = tokio::task::spawn_blocking(move || filters.apply(filter, &input))
            .await
            .map_err(|e| FilterError::Task(e.to_string()))??;

        let filtered_id = session
            .gateway
            .upload_image(fetched.workload_id, ImageKind::Filtered, Bytes::from(output), &session.token)
            .await
            .map_err(AgentError::ImageUpload)?;
        info!(image_id, filtered_id, workload_id = fetched.workload_id, "filter applied");
        Ok(filtered_id)
    }
}

#[async_trait]
impl FilterRpc for WorkerAgent {
    async fn grayscale(&self, image_id: ImageId) -> Result<ImageId, AgentError> {
        self.execute_filter(FilterKind::Grayscale, image_id).await
    }

    async fn blur(&self, image_id: ImageId) -> Result<ImageId, AgentError> {
        self.execute_filter(FilterKind::Blur, image_id).await
    }
}
