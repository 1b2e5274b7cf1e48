//! Pushes workload and image events to the controller's ingest channels.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

use dpip_core::{Image, Workload, WorkloadId};
use dpip_eisenbahn::ingest::WorkloadEvent;
use dpip_eisenbahn::{topics, Message, PipelineSender, Transport, ZmqPipelineSender};

use crate::error::GatewayError;

/// Producer side of the two ingest channels.
///
/// Every workload event is stamped with a per-workload sequence number so
/// the controller can drop stale states.
pub struct EventPublisher {
    workloads: ZmqPipelineSender,
    images: ZmqPipelineSender,
    seq: Mutex<HashMap<WorkloadId, u64>>,
}

impl EventPublisher {
    /// Connect PUSH sockets to the controller's workload and image endpoints.
    pub async fn connect(workloads: &Transport, images: &Transport) -> Result<Self, GatewayError> {
        Ok(Self {
            workloads: ZmqPipelineSender::connect(workloads).await?,
            images: ZmqPipelineSender::connect(images).await?,
            seq: Mutex::new(HashMap::new()),
        })
    }

    pub async fn publish_workload(&self, workload: &Workload) -> Result<(), GatewayError> {
        // Held across the send so sequence order matches send order.
        let mut seq = self.seq.lock().await;
        let next = seq.entry(workload.id).or_insert(0);
        *next += 1;
        let event = WorkloadEvent::from_workload(workload, Some(*next));
        let msg = Message::new(topics::WORKLOAD_EVENT, &event)
            .map_err(dpip_eisenbahn::EisenbahnError::from)?;
        self.workloads.send(msg).await?;
        debug!(workload_id = workload.id, seq = *next, "workload event published");
        Ok(())
    }

    pub async fn publish_image(&self, image: &Image) -> Result<(), GatewayError> {
        let msg = Message::new(topics::IMAGE_EVENT, image).map_err(dpip_eisenbahn::EisenbahnError::from)?;
        self.images.send(msg).await?;
        debug!(image_id = image.id, workload_id = image.workload_id, kind = %image.kind, "image event published");
        Ok(())
    }
}
