use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DpipError;

pub type WorkloadId = u64;
pub type ImageId = u64;

/// A named batch of images sharing one filter.
///
/// The gateway owns workload identity and always sends the full current
/// record, never a delta. Field aliases accept the legacy gateway's JSON
/// names (`workload_id`, `workload_name`, `filtered_images`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    #[serde(alias = "workload_id")]
    pub id: WorkloadId,
    pub filter: String,
    #[serde(alias = "workload_name")]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub running_jobs: i64,
    /// Image ids in upload order. Only ever grows.
    #[serde(default, alias = "filtered_images", deserialize_with = "null_as_empty")]
    pub image_ids: Vec<ImageId>,
}

impl Workload {
    pub fn new(id: WorkloadId, name: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            id,
            filter: filter.into(),
            name: name.into(),
            status: String::new(),
            running_jobs: 0,
            image_ids: Vec::new(),
        }
    }

    /// The most recently uploaded image, if any.
    pub fn newest_image(&self) -> Option<ImageId> {
        self.image_ids.last().copied()
    }
}

/// Whether an image is a user upload or the output of a filter job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Original,
    Filtered,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Original => "original",
            ImageKind::Filtered => "filtered",
        }
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageKind {
    type Err = DpipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(ImageKind::Original),
            "filtered" => Ok(ImageKind::Filtered),
            other => Err(DpipError::UnknownImageKind(other.to_string())),
        }
    }
}

/// Image metadata as announced by the gateway. The payload itself stays
/// in gateway storage; the `workload_id` is a lookup key, not ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    #[serde(alias = "image_id")]
    pub id: ImageId,
    pub workload_id: WorkloadId,
    #[serde(alias = "type")]
    pub kind: ImageKind,
    #[serde(default)]
    pub size: u64,
}

/// Go encodes a nil slice as `null`; treat that as an empty list.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ImageId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ImageId>>::deserialize(deserializer)?.unwrap_or_default())
}
