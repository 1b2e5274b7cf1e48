use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DpipError;
use crate::workload::{ImageId, WorkloadId};

/// A transient unit of work: apply `filter` to `image_id`.
///
/// Jobs exist only between discovery and dispatch and are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub filter: String,
    pub image_id: ImageId,
    /// Owning workload, used for `running_jobs` bookkeeping.
    #[serde(default)]
    pub workload_id: Option<WorkloadId>,
}

impl Job {
    pub fn new(filter: impl Into<String>, image_id: ImageId) -> Self {
        Self {
            filter: filter.into(),
            image_id,
            workload_id: None,
        }
    }

    pub fn for_workload(mut self, workload_id: WorkloadId) -> Self {
        self.workload_id = Some(workload_id);
        self
    }
}

/// Filters a worker knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Grayscale,
    Blur,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::Grayscale => "grayscale",
            FilterKind::Blur => "blur",
        }
    }
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = DpipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grayscale" | "greyscale" => Ok(FilterKind::Grayscale),
            "blur" => Ok(FilterKind::Blur),
            other => Err(DpipError::UnknownFilter(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_kind_from_workload_names() {
        assert_eq!("grayscale".parse::<FilterKind>().unwrap(), FilterKind::Grayscale);
        assert_eq!("Greyscale".parse::<FilterKind>().unwrap(), FilterKind::Grayscale);
        assert_eq!("blur".parse::<FilterKind>().unwrap(), FilterKind::Blur);
        match "sepia".parse::<FilterKind>() {
            Err(DpipError::UnknownFilter(name)) => assert_eq!(name, "sepia"),
            other => panic!("expected UnknownFilter, got {other:?}"),
        }
    }

    #[test]
    fn job_without_workload_decodes() {
        let job: Job = serde_json::from_str(r#"{"filter":"blur","image_id":5}"#).unwrap();
        assert_eq!(job, Job::new("blur", 5));
        assert_eq!(Job::new("blur", 5).for_workload(3).workload_id, Some(3));
    }
}
