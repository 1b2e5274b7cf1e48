//! Worker admission, ids, credentials and load.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use dpip_core::{Worker, WorkerId};
use dpip_eisenbahn::registry::{JoinReply, RegistryReply, RegistryRequest, RejectReason};
use dpip_gateway::Gateway;

use crate::error::RegistryError;

#[derive(Debug, Clone)]
struct Entry {
    worker: Worker,
    last_seen: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    workers: BTreeMap<WorkerId, Entry>,
    next_id: WorkerId,
}

/// The only owner of [`Worker`] records.
///
/// Ids start at 0 and are only consumed by successful registrations, so
/// the ids ever handed out form a prefix of the naturals.
pub struct WorkerRegistry {
    gateway: Arc<dyn Gateway>,
    api_endpoint: String,
    inner: RwLock<Inner>,
}

impl WorkerRegistry {
    /// `api_endpoint` is the gateway URL handed to every admitted worker.
    pub fn new(gateway: Arc<dyn Gateway>, api_endpoint: impl Into<String>) -> Self {
        Self {
            gateway,
            api_endpoint: api_endpoint.into(),
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Admit a worker: log it in at the gateway, then assign the next id.
    ///
    /// The login happens before the lock is taken, so a slow gateway does
    /// not hold up heartbeats or snapshots.
    pub async fn register(&self, name: &str, rpc_endpoint: &str, load: u64) -> Result<Worker, RegistryError> {
        let secret = Uuid::new_v4().to_string();
        let token = self
            .gateway
            .issue_credential(name, &secret)
            .await
            .map_err(|e| RegistryError::CredentialIssuance(e.to_string()))?;

        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;
        let worker = Worker {
            id,
            name: name.to_string(),
            token,
            load,
            rpc_endpoint: rpc_endpoint.to_string(),
            api_endpoint: self.api_endpoint.clone(),
        };
        inner.workers.insert(
            id,
            Entry {
                worker: worker.clone(),
                last_seen: Instant::now(),
            },
        );
        info!(worker_id = id, name, rpc_endpoint, "worker registered");
        Ok(worker)
    }

    /// Record a load sample. Never creates an entry.
    pub async fn report_load(&self, id: WorkerId, load: u64) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .workers
            .get_mut(&id)
            .ok_or(RegistryError::UnknownWorker(id))?;
        entry.worker.load = load;
        entry.last_seen = Instant::now();
        Ok(())
    }

    /// Point-in-time copy of all workers, ordered by id.
    pub async fn snapshot(&self) -> Vec<Worker> {
        self.inner
            .read()
            .await
            .workers
            .values()
            .map(|e| e.worker.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.workers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove workers not heard from within `ttl`. Returns the evicted ids.
    pub async fn evict_stale(&self, ttl: Duration) -> Vec<WorkerId> {
        let mut inner = self.inner.write().await;
        let stale: Vec<WorkerId> = inner
            .workers
            .values()
            .filter(|e| e.last_seen.elapsed() >= ttl)
            .map(|e| e.worker.id)
            .collect();
        for id in &stale {
            inner.workers.remove(id);
            warn!(worker_id = id, ttl_secs = ttl.as_secs(), "evicted silent worker");
        }
        stale
    }

    /// Answer one request from the registration channel.
    pub async fn handle(&self, request: RegistryRequest) -> RegistryReply {
        match request {
            RegistryRequest::Join(join) => {
                match self.register(&join.name, &join.rpc_endpoint, join.load).await {
                    Ok(worker) => RegistryReply::Joined(JoinReply {
                        id: worker.id,
                        token: worker.token,
                        api_endpoint: worker.api_endpoint,
                    }),
                    Err(e) => {
                        warn!(name = %join.name, error = %e, "registration refused");
                        RegistryReply::rejected(RejectReason::CredentialIssuance, e.to_string())
                    }
                }
            }
            RegistryRequest::Heartbeat(report) => match self.report_load(report.id, report.load).await {
                Ok(()) => RegistryReply::Ack {
                    message: format!("load {} recorded for worker {}", report.load, report.id),
                },
                Err(e) => RegistryReply::rejected(RejectReason::UnknownWorker, e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use dpip_eisenbahn::registry::{JoinRequest, LoadReport};
    use dpip_gateway::MemoryGateway;

    fn registry_with(gateway: Arc<MemoryGateway>) -> Arc<WorkerRegistry> {
        Arc::new(WorkerRegistry::new(gateway, "http://localhost:8080"))
    }

    #[tokio::test]
    async fn concurrent_registrations_get_distinct_prefix_ids() {
        let registry = registry_with(Arc::new(MemoryGateway::new()));

        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .register(&format!("w{i}"), "tcp://127.0.0.1:50051", 0)
                    .await
                    .unwrap()
                    .id
            }));
        }
        let mut ids = HashSet::new();
        for h in handles {
            ids.insert(h.await.unwrap());
        }
        let expected: HashSet<WorkerId> = (0..32).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn failed_login_consumes_no_id() {
        let gateway = Arc::new(MemoryGateway::new());
        let registry = registry_with(Arc::clone(&gateway));

        gateway.refuse_logins(true);
        assert!(matches!(
            registry.register("w1", "tcp://a:1", 0).await,
            Err(RegistryError::CredentialIssuance(_))
        ));
        assert!(registry.is_empty().await);

        gateway.refuse_logins(false);
        let worker = registry.register("w1", "tcp://a:1", 0).await.unwrap();
        assert_eq!(worker.id, 0);
        assert!(gateway.is_valid_token(&worker.token).await);
        assert_eq!(worker.api_endpoint, "http://localhost:8080");
    }

    #[tokio::test]
    async fn report_load_for_unknown_id_changes_nothing() {
        let registry = registry_with(Arc::new(MemoryGateway::new()));
        registry.register("w1", "tcp://a:1", 3).await.unwrap();
        let before = registry.snapshot().await;

        assert!(matches!(
            registry.report_load(7, 100).await,
            Err(RegistryError::UnknownWorker(7))
        ));
        assert_eq!(registry.snapshot().await, before);

        registry.report_load(0, 100).await.unwrap();
        assert_eq!(registry.snapshot().await[0].load, 100);
    }

    #[tokio::test]
    async fn stale_workers_are_evicted() {
        let registry = registry_with(Arc::new(MemoryGateway::new()));
        registry.register("w1", "tcp://a:1", 0).await.unwrap();
        registry.register("w2", "tcp://a:2", 0).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        registry.report_load(1, 5).await.unwrap();

        assert_eq!(registry.evict_stale(Duration::from_millis(50)).await, vec![0]);
        let remaining: Vec<WorkerId> = registry.snapshot().await.iter().map(|w| w.id).collect();
        assert_eq!(remaining, vec![1]);
        assert!(registry.report_load(0, 1).await.is_err());
    }

    #[tokio::test]
    async fn handle_maps_requests_to_replies() {
        let gateway = Arc::new(MemoryGateway::new());
        let registry = registry_with(Arc::clone(&gateway));

        let join = RegistryRequest::Join(JoinRequest {
            name: "w1".into(),
            load: 0,
            rpc_endpoint: "tcp://127.0.0.1:50051".into(),
        });
        let RegistryReply::Joined(joined) = registry.handle(join.clone()).await else {
            panic!("expected joined");
        };
        assert_eq!(joined.id, 0);

        match registry.handle(RegistryRequest::Heartbeat(LoadReport { id: 0, load: 9 })).await {
            RegistryReply::Ack { message } => assert!(!message.is_empty()),
            other => panic!("expected ack, got {other:?}"),
        }
        match registry.handle(RegistryRequest::Heartbeat(LoadReport { id: 5, load: 9 })).await {
            RegistryReply::Rejected { reason, .. } => assert_eq!(reason, RejectReason::UnknownWorker),
            other => panic!("expected rejection, got {other:?}"),
        }

        gateway.refuse_logins(true);
        match registry.handle(join).await {
            RegistryReply::Rejected { reason, .. } => assert_eq!(reason, RejectReason::CredentialIssuance),
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
