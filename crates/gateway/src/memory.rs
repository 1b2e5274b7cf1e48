//! In-process [`Gateway`] holding workloads and image bytes in memory.
//!
//! Login accepts any secret and hands out a fresh token. Uploads are
//! appended to their workload and, when a publisher is attached, announced
//! the same way the HTTP gateway does: workload event, then image event.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use dpip_core::{Image, ImageId, ImageKind, Workload, WorkloadId};

use crate::error::GatewayError;
use crate::publisher::EventPublisher;
use crate::traits::{FetchedImage, Gateway};

#[derive(Debug, Clone)]
struct StoredImage {
    workload_id: WorkloadId,
    kind: ImageKind,
    bytes: Bytes,
}

#[derive(Debug, Default)]
struct State {
    workloads: HashMap<WorkloadId, Workload>,
    images: HashMap<ImageId, StoredImage>,
    tokens: HashSet<String>,
    next_image_id: ImageId,
    next_token: u64,
}

#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<State>,
    publisher: Option<EventPublisher>,
    refuse_logins: AtomicBool,
    refuse_uploads: AtomicBool,
}

fn status(code: u16, body: impl Into<String>) -> GatewayError {
    GatewayError::Status {
        status: code,
        body: body.into(),
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce uploads and workload changes through `publisher`.
    pub fn with_publisher(publisher: EventPublisher) -> Self {
        Self {
            publisher: Some(publisher),
            ..Self::default()
        }
    }

    /// Make every following login fail with a 503.
    pub fn refuse_logins(&self, refuse: bool) {
        self.refuse_logins.store(refuse, Ordering::SeqCst);
    }

    /// Make every following worker upload fail with a 503. Fetches and
    /// user uploads are unaffected.
    pub fn refuse_uploads(&self, refuse: bool) {
        self.refuse_uploads.store(refuse, Ordering::SeqCst);
    }

    /// Create or replace a workload and announce it.
    pub async fn put_workload(&self, workload: Workload) -> Result<(), GatewayError> {
        self.state.lock().await.workloads.insert(workload.id, workload.clone());
        if let Some(publisher) = &self.publisher {
            publisher.publish_workload(&workload).await?;
        }
        Ok(())
    }

    /// Upload an image on behalf of a user, without a token.
    pub async fn upload_original(&self, workload_id: WorkloadId, bytes: Bytes) -> Result<ImageId, GatewayError> {
        self.store(workload_id, ImageKind::Original, bytes).await
    }

    pub async fn workload(&self, workload_id: WorkloadId) -> Option<Workload> {
        self.state.lock().await.workloads.get(&workload_id).cloned()
    }

    /// Kind and bytes of a stored image.
    pub async fn image(&self, image_id: ImageId) -> Option<(ImageKind, Bytes)> {
        self.state
            .lock()
            .await
            .images
            .get(&image_id)
            .map(|img| (img.kind, img.bytes.clone()))
    }

    pub async fn is_valid_token(&self, token: &str) -> bool {
        self.state.lock().await.tokens.contains(token)
    }

    async fn authorize(&self, token: &str) -> Result<(), GatewayError> {
        if self.is_valid_token(token).await {
            Ok(())
        } else {
            Err(status(401, "invalid token"))
        }
    }

    async fn store(&self, workload_id: WorkloadId, kind: ImageKind, bytes: Bytes) -> Result<ImageId, GatewayError> {
        let (workload, image) = {
            let mut state = self.state.lock().await;
            if !state.workloads.contains_key(&workload_id) {
                return Err(status(404, format!("workload {workload_id} not found")));
            }
            let image_id = state.next_image_id;
            state.next_image_id += 1;
            let size = bytes.len() as u64;
            state.images.insert(
                image_id,
                StoredImage {
                    workload_id,
                    kind,
                    bytes,
                },
            );
            let Some(workload) = state.workloads.get_mut(&workload_id) else {
                return Err(status(404, format!("workload {workload_id} not found")));
            };
            workload.image_ids.push(image_id);
            let image = Image {
                id: image_id,
                workload_id,
                kind,
                size,
            };
            (workload.clone(), image)
        };
        debug!(workload_id, image_id = image.id, %kind, "image stored");

        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish_workload(&workload).await {
                warn!(error = %e, workload_id, "failed to announce workload");
            }
            if let Err(e) = publisher.publish_image(&image).await {
                warn!(error = %e, image_id = image.id, "failed to announce image");
            }
        }
        Ok(image.id)
    }
}

#[async_trait::async_trait]
impl Gateway for MemoryGateway {
    async fn issue_credential(&self, username: &str, secret: &str) -> Result<String, GatewayError> {
        if self.refuse_logins.load(Ordering::SeqCst) {
            return Err(status(503, "login disabled"));
        }
        if username.is_empty() || secret.is_empty() {
            return Err(status(400, "username and secret are required"));
        }
        let mut state = self.state.lock().await;
        state.next_token += 1;
        let token = format!("token-{username}-{}", state.next_token);
        state.tokens.insert(token.clone());
        Ok(token)
    }

    async fn fetch_image(&self, image_id: ImageId, token: &str) -> Result<FetchedImage, GatewayError> {
        self.authorize(token).await?;
        let state = self.state.lock().await;
        let image = state
            .images
            .get(&image_id)
            .ok_or_else(|| status(404, format!("image {image_id} not found")))?;
        Ok(FetchedImage {
            bytes: image.bytes.clone(),
            kind: image.kind,
            workload_id: image.workload_id,
        })
    }

    async fn upload_image(
        &self,
        workload_id: WorkloadId,
        kind: ImageKind,
        bytes: Bytes,
        token: &str,
    ) -> Result<ImageId, GatewayError> {
        self.authorize(token).await?;
        if self.refuse_uploads.load(Ordering::SeqCst) {
            return Err(status(503, "uploads disabled"));
        }
        self.store(workload_id, kind, bytes).await
    }

    async fn get_workload(&self, workload_id: WorkloadId, token: &str) -> Result<Workload, GatewayError> {
        self.authorize(token).await?;
        self.workload(workload_id)
            .await
            .ok_or_else(|| status(404, format!("workload {workload_id} not found")))
    }
}
