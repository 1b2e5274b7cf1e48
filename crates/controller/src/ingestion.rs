//! Workload and image mirrors, and job discovery.
//!
//! The newest image of a workload is its discovery candidate. A job is
//! emitted for it once, and only when it is known to be an `original`
//! upload: filtered results re-announce their workload too, and
//! re-filtering them would never terminate. When a workload event names an
//! image whose kind has not arrived yet, the workload is parked on that
//! image and discovery re-runs when the image event comes in.

use std::collections::{BTreeMap, HashMap, HashSet};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use dpip_core::{Image, ImageId, ImageKind, Job, Workload, WorkloadId};
use dpip_eisenbahn::ingest::WorkloadEvent;

#[derive(Debug, Default)]
struct Mirror {
    workloads: BTreeMap<WorkloadId, Workload>,
    images: HashMap<ImageId, Image>,
    dispatched: HashSet<ImageId>,
    /// Candidate image id -> workload waiting for that image's kind.
    parked: HashMap<ImageId, WorkloadId>,
    last_seq: HashMap<WorkloadId, u64>,
    /// Jobs handed to the dispatcher and not yet reported back.
    in_flight: HashMap<WorkloadId, i64>,
}

impl Mirror {
    fn discover(&mut self, workload_id: WorkloadId) -> Option<Job> {
        let workload = self.workloads.get(&workload_id)?;
        let candidate = workload.newest_image()?;
        if self.dispatched.contains(&candidate) {
            return None;
        }
        match self.images.get(&candidate).map(|img| img.kind) {
            Some(ImageKind::Filtered) => None,
            None => {
                debug!(workload_id, image_id = candidate, "image kind unknown, parking workload");
                self.parked.insert(candidate, workload_id);
                None
            }
            Some(ImageKind::Original) => {
                let job = Job::new(workload.filter.clone(), candidate).for_workload(workload_id);
                self.parked.remove(&candidate);
                self.dispatched.insert(candidate);
                self.set_in_flight(workload_id, 1);
                Some(job)
            }
        }
    }

    fn set_in_flight(&mut self, workload_id: WorkloadId, delta: i64) {
        let count = self.in_flight.entry(workload_id).or_insert(0);
        *count = (*count + delta).max(0);
        let count = *count;
        if let Some(workload) = self.workloads.get_mut(&workload_id) {
            workload.running_jobs = count;
        }
    }
}

/// Sole mutator of the workload and image mirrors.
pub struct Ingestion {
    mirror: Mutex<Mirror>,
    jobs: mpsc::Sender<Job>,
}

impl Ingestion {
    /// Discovered jobs are sent to `jobs`.
    pub fn new(jobs: mpsc::Sender<Job>) -> Self {
        Self {
            mirror: Mutex::new(Mirror::default()),
            jobs,
        }
    }

    /// Upsert a workload from its full current state and run discovery.
    ///
    /// `running_jobs` is kept from local bookkeeping rather than taken
    /// from the event. Returns the job that was forwarded, if any.
    pub async fn on_workload_event(&self, event: WorkloadEvent) -> Option<Job> {
        let job = {
            let mut mirror = self.mirror.lock().await;
            if let Some(seq) = event.seq {
                let last = mirror.last_seq.get(&event.id).copied();
                if last.is_some_and(|last| seq <= last) {
                    debug!(workload_id = event.id, seq, ?last, "dropping stale workload event");
                    return None;
                }
                mirror.last_seq.insert(event.id, seq);
            }

            let mut workload = Workload::from(event);
            workload.running_jobs = mirror.in_flight.get(&workload.id).copied().unwrap_or(0);
            let id = workload.id;
            if mirror.workloads.insert(id, workload).is_none() {
                info!(workload_id = id, "new workload");
            }
            mirror.discover(id)
        };
        self.forward(job).await
    }

    /// Record an image's kind and resume a workload parked on it.
    pub async fn on_image_event(&self, image: Image) -> Option<Job> {
        let job = {
            let mut mirror = self.mirror.lock().await;
            if !mirror.workloads.contains_key(&image.workload_id) {
                // Its workload event may still be in flight on the other channel.
                debug!(image_id = image.id, workload_id = image.workload_id, "image for unseen workload");
            }
            let image_id = image.id;
            mirror.images.insert(image_id, image);
            match mirror.parked.remove(&image_id) {
                Some(workload_id) => mirror.discover(workload_id),
                None => None,
            }
        };
        self.forward(job).await
    }

    /// Run discovery for one workload without changing it.
    pub async fn discover_job(&self, workload_id: WorkloadId) -> Option<Job> {
        let job = self.mirror.lock().await.discover(workload_id);
        self.forward(job).await
    }

    /// Report a dispatched job as finished, successfully or not.
    pub async fn complete_job(&self, job: &Job) {
        let Some(workload_id) = job.workload_id else {
            return;
        };
        self.mirror.lock().await.set_in_flight(workload_id, -1);
    }

    pub async fn workload(&self, id: WorkloadId) -> Option<Workload> {
        self.mirror.lock().await.workloads.get(&id).cloned()
    }

    /// Copy of every mirrored workload, ordered by id.
    pub async fn workloads(&self) -> Vec<Workload> {
        self.mirror.lock().await.workloads.values().cloned().collect()
    }

    async fn forward(&self, job: Option<Job>) -> Option<Job> {
        let job = job?;
        info!(filter = %job.filter, image_id = job.image_id, workload_id = ?job.workload_id, "job discovered");
        if self.jobs.send(job.clone()).await.is_err() {
            warn!(image_id = job.image_id, "dispatcher queue closed, job dropped");
        }
        Some(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: WorkloadId, images: &[ImageId]) -> WorkloadEvent {
        WorkloadEvent {
            id,
            filter: "grayscale".into(),
            name: format!("workload-{id}"),
            status: "running".into(),
            running_jobs: 0,
            image_ids: images.to_vec(),
            seq: None,
        }
    }

    fn image(id: ImageId, workload_id: WorkloadId, kind: ImageKind) -> Image {
        Image {
            id,
            workload_id,
            kind,
            size: 10,
        }
    }

    fn ingestion() -> (Ingestion, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(16);
        (Ingestion::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Job>) -> Vec<Job> {
        let mut jobs = Vec::new();
        while let Ok(job) = rx.try_recv() {
            jobs.push(job);
        }
        jobs
    }

    #[tokio::test]
    async fn upload_yields_exactly_one_job_in_either_order() {
        // Workload event before image event.
        let (ing, mut rx) = ingestion();
        assert_eq!(ing.on_workload_event(event(7, &[])).await, None);
        assert_eq!(ing.on_workload_event(event(7, &[42])).await, None);
        ing.on_image_event(image(42, 7, ImageKind::Original)).await;
        assert_eq!(drain(&mut rx), vec![Job::new("grayscale", 42).for_workload(7)]);

        // Image event before workload event.
        let (ing, mut rx) = ingestion();
        ing.on_workload_event(event(7, &[])).await;
        assert_eq!(ing.on_image_event(image(42, 7, ImageKind::Original)).await, None);
        ing.on_workload_event(event(7, &[42])).await;
        assert_eq!(drain(&mut rx), vec![Job::new("grayscale", 42).for_workload(7)]);
    }

    #[tokio::test]
    async fn redelivered_event_is_not_rediscovered() {
        let (ing, mut rx) = ingestion();
        ing.on_image_event(image(5, 3, ImageKind::Original)).await;
        assert!(ing.on_workload_event(event(3, &[5])).await.is_some());
        assert!(ing.on_workload_event(event(3, &[5])).await.is_none());
        assert!(ing.discover_job(3).await.is_none());
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn filtered_result_ends_the_loop() {
        let (ing, mut rx) = ingestion();
        ing.on_image_event(image(5, 3, ImageKind::Original)).await;
        ing.on_workload_event(event(3, &[5])).await;

        // The worker's upload re-announces the workload.
        ing.on_image_event(image(6, 3, ImageKind::Filtered)).await;
        assert!(ing.on_workload_event(event(3, &[5, 6])).await.is_none());
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn running_jobs_tracks_in_flight_work() {
        let (ing, _rx) = ingestion();
        ing.on_image_event(image(5, 3, ImageKind::Original)).await;
        let job = ing.on_workload_event(event(3, &[5])).await.unwrap();
        assert_eq!(ing.workload(3).await.unwrap().running_jobs, 1);

        // A gateway overwrite does not reset the local count.
        ing.on_workload_event(event(3, &[5])).await;
        assert_eq!(ing.workload(3).await.unwrap().running_jobs, 1);

        ing.complete_job(&job).await;
        ing.complete_job(&job).await;
        assert_eq!(ing.workload(3).await.unwrap().running_jobs, 0);
    }

    #[tokio::test]
    async fn stale_sequence_numbers_are_dropped() {
        let (ing, _rx) = ingestion();
        let mut newer = event(3, &[1, 2]);
        newer.seq = Some(2);
        let mut older = event(3, &[1]);
        older.seq = Some(1);

        ing.on_workload_event(newer).await;
        ing.on_workload_event(older).await;
        assert_eq!(ing.workload(3).await.unwrap().image_ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn overwrite_replaces_in_place() {
        let (ing, _rx) = ingestion();
        ing.on_workload_event(event(1, &[])).await;
        ing.on_workload_event(event(2, &[])).await;
        let mut renamed = event(1, &[]);
        renamed.name = "renamed".into();
        ing.on_workload_event(renamed).await;

        let all = ing.workloads().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "renamed");
    }
}
