//! Events pushed by the gateway into the controller's ingest channels.

use serde::{Deserialize, Deserializer, Serialize};

use dpip_core::{Image, ImageId, Workload, WorkloadId};

/// Image metadata event. Same shape as the mirrored [`Image`].
pub type ImageEvent = Image;

/// Full current state of one workload, as sent after every change.
///
/// `seq`, when present, increases per workload; receivers drop events
/// that are not newer than the last one applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadEvent {
    #[serde(alias = "workload_id")]
    pub id: WorkloadId,
    pub filter: String,
    #[serde(alias = "workload_name")]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub running_jobs: i64,
    #[serde(default, alias = "filtered_images", deserialize_with = "null_as_empty")]
    pub image_ids: Vec<ImageId>,
    #[serde(default)]
    pub seq: Option<u64>,
}

impl WorkloadEvent {
    pub fn from_workload(workload: &Workload, seq: Option<u64>) -> Self {
        Self {
            id: workload.id,
            filter: workload.filter.clone(),
            name: workload.name.clone(),
            status: workload.status.clone(),
            running_jobs: workload.running_jobs,
            image_ids: workload.image_ids.clone(),
            seq,
        }
    }
}

impl From<WorkloadEvent> for Workload {
    fn from(event: WorkloadEvent) -> Self {
        Workload {
            id: event.id,
            filter: event.filter,
            name: event.name,
            status: event.status,
            running_jobs: event.running_jobs,
            image_ids: event.image_ids,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ImageId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ImageId>>::deserialize(deserializer)?.unwrap_or_default())
}
