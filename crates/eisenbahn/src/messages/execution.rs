//! Execution RPC payloads between the dispatcher and a worker.

use serde::{Deserialize, Serialize};

use dpip_core::{ImageId, Job};

/// Ask a worker to apply `filter` to an image.
///
/// The image id travels as a string, matching the historical RPC shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRequest {
    pub filter: String,
    pub image_id: String,
}

impl FilterRequest {
    pub fn image_id(&self) -> Option<ImageId> {
        self.image_id.trim().parse().ok()
    }
}

impl From<&Job> for FilterRequest {
    fn from(job: &Job) -> Self {
        Self {
            filter: job.filter.clone(),
            image_id: job.image_id.to_string(),
        }
    }
}

/// Outcome of a filter call. Failures are replies too, never silence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterReply {
    pub message: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub filtered_image_id: Option<ImageId>,
}

impl FilterReply {
    pub fn ok(filtered_image_id: ImageId) -> Self {
        Self {
            message: format!("filter applied, uploaded image {filtered_image_id}"),
            success: true,
            filtered_image_id: Some(filtered_image_id),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
            filtered_image_id: None,
        }
    }
}
