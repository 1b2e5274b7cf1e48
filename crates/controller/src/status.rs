//! Read-only HTTP view of the controller's state.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use dpip_core::{Worker, Workload};

use crate::ingestion::Ingestion;
use crate::registry::WorkerRegistry;

#[derive(Clone)]
pub struct StatusState {
    pub system_name: String,
    pub registry: Arc<WorkerRegistry>,
    pub ingestion: Arc<Ingestion>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub system_name: String,
    pub server_time: DateTime<Utc>,
    pub workers: usize,
    pub workloads: Vec<Workload>,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/workers", get(workers_handler))
        .route("/workloads", get(workloads_handler))
        .with_state(state)
}

/// Serve the status endpoint on an already bound listener until shutdown.
pub fn spawn_status_server(
    listener: tokio::net::TcpListener,
    state: StatusState,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();
        tracing::info!(port, "status HTTP server listening");

        axum::serve(listener, router(state))
            .with_graceful_shutdown(async move {
                let mut rx = shutdown;
                while !*rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .ok();

        tracing::info!("status HTTP server stopped");
    })
}

async fn status_handler(State(state): State<StatusState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        system_name: state.system_name.clone(),
        server_time: Utc::now(),
        workers: state.registry.len().await,
        workloads: state.ingestion.workloads().await,
    })
}

/// Registered workers with their tokens blanked.
async fn workers_handler(State(state): State<StatusState>) -> Json<Vec<Worker>> {
    Json(state.registry.snapshot().await.iter().map(Worker::redacted).collect())
}

async fn workloads_handler(State(state): State<StatusState>) -> Json<Vec<Workload>> {
    Json(state.ingestion.workloads().await)
}
