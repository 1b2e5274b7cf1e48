//! Gateway trait and the values it returns.

use std::sync::Arc;

use bytes::Bytes;

use dpip_core::{ImageId, ImageKind, Workload, WorkloadId};

use crate::error::GatewayError;

/// An image downloaded from the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Bytes,
    pub kind: ImageKind,
    pub workload_id: WorkloadId,
}

/// Operations the core consumes from the gateway.
#[async_trait::async_trait]
pub trait Gateway: Send + Sync {
    /// Log `username` in with `secret` and return the bearer token.
    async fn issue_credential(&self, username: &str, secret: &str) -> Result<String, GatewayError>;

    async fn fetch_image(&self, image_id: ImageId, token: &str) -> Result<FetchedImage, GatewayError>;

    /// Store a new image and return the id the gateway assigned.
    ///
    /// The gateway announces the new image and the updated workload to the
    /// controller on its own; callers do not publish anything.
    async fn upload_image(
        &self,
        workload_id: WorkloadId,
        kind: ImageKind,
        bytes: Bytes,
        token: &str,
    ) -> Result<ImageId, GatewayError>;

    async fn get_workload(&self, workload_id: WorkloadId, token: &str) -> Result<Workload, GatewayError>;
}

/// Builds a gateway client for a base URL handed out at registration.
pub type GatewayFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn Gateway>, GatewayError> + Send + Sync>;
