//! Minimal HTTP front over [`MemoryGateway`] speaking the gateway API.
//!
//! Only for tests: authorization is checked by token lookup and the basic
//! auth credentials are not decoded.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;

use dpip_core::{ImageId, ImageKind, WorkloadId};

use crate::error::GatewayError;
use crate::http::{IMAGE_KIND_HEADER, WORKLOAD_ID_HEADER};
use crate::memory::MemoryGateway;
use crate::traits::Gateway;

type AppState = Arc<MemoryGateway>;

pub fn router(gateway: Arc<MemoryGateway>) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/images", post(upload))
        .route("/images/{id}", get(fetch))
        .route("/workloads/{id}", get(workload))
        .with_state(gateway)
}

/// Serve the fake on an ephemeral loopback port and return its base URL.
pub async fn spawn(gateway: Arc<MemoryGateway>) -> std::io::Result<(String, tokio::task::JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    spawn_on(listener, gateway)
}

/// Serve the fake on a listener bound by the caller, so its URL can be
/// handed out before the gateway itself exists.
pub fn spawn_on(
    listener: tokio::net::TcpListener,
    gateway: Arc<MemoryGateway>,
) -> std::io::Result<(String, tokio::task::JoinHandle<()>)> {
    let addr = listener.local_addr()?;
    let app = router(gateway);
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok((format!("http://{addr}"), handle))
}

fn error_response(err: GatewayError) -> Response {
    match err {
        GatewayError::Status { status, body } => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
        )
            .into_response(),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
    }
}

fn auth_value<'a>(headers: &'a HeaderMap, scheme: &str) -> Option<&'a str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix(scheme)
        .map(str::trim)
}

async fn login(State(gw): State<AppState>, headers: HeaderMap) -> Response {
    let Some(credentials) = auth_value(&headers, "Basic ") else {
        return (StatusCode::UNAUTHORIZED, "basic auth required").into_response();
    };
    match gw.issue_credential("basic", credentials).await {
        Ok(token) => Json(json!({ "message": "logged in", "token": token })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn fetch(State(gw): State<AppState>, Path(id): Path<ImageId>, headers: HeaderMap) -> Response {
    let token = auth_value(&headers, "Bearer ").unwrap_or_default();
    match gw.fetch_image(id, token).await {
        Ok(image) => (
            [
                (WORKLOAD_ID_HEADER, image.workload_id.to_string()),
                (IMAGE_KIND_HEADER, image.kind.to_string()),
            ],
            image.bytes,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn upload(State(gw): State<AppState>, headers: HeaderMap, mut multipart: Multipart) -> Response {
    let token = auth_value(&headers, "Bearer ").unwrap_or_default().to_string();
    let mut data: Option<Bytes> = None;
    let mut workload_id: Option<WorkloadId> = None;
    let mut kind = ImageKind::Original;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let Ok(value) = field.bytes().await else {
            return (StatusCode::BAD_REQUEST, "unreadable field").into_response();
        };
        match name.as_str() {
            "data" => data = Some(value),
            "workload_id" => workload_id = String::from_utf8_lossy(&value).trim().parse().ok(),
            "type" => match String::from_utf8_lossy(&value).parse() {
                Ok(k) => kind = k,
                Err(_) => return (StatusCode::BAD_REQUEST, "bad type").into_response(),
            },
            _ => {}
        }
    }

    let (Some(data), Some(workload_id)) = (data, workload_id) else {
        return (StatusCode::BAD_REQUEST, "data and workload_id are required").into_response();
    };
    let size = data.len();
    match gw.upload_image(workload_id, kind, data, &token).await {
        Ok(image_id) => (
            StatusCode::CREATED,
            Json(json!({
                "message": "image uploaded",
                "workload_id": workload_id,
                "image_id": image_id,
                "type": kind,
                "size": size,
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn workload(State(gw): State<AppState>, Path(id): Path<WorkloadId>, headers: HeaderMap) -> Response {
    let token = auth_value(&headers, "Bearer ").unwrap_or_default();
    match gw.get_workload(id, token).await {
        Ok(w) => Json(w).into_response(),
        Err(e) => error_response(e),
    }
}
