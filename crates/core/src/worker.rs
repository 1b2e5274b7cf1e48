use serde::{Deserialize, Serialize};

pub type WorkerId = u64;

/// A registered worker as seen by the registry and the dispatcher.
///
/// `load` is the most recent CPU-busy tick counter the worker reported.
/// Counters are only compared across workers at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub token: String,
    pub load: u64,
    pub rpc_endpoint: String,
    pub api_endpoint: String,
}

impl Worker {
    /// Copy of this worker with the credential blanked, for status output.
    pub fn redacted(&self) -> Self {
        Self {
            token: "<redacted>".to_string(),
            ..self.clone()
        }
    }
}
