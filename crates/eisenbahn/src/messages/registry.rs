//! Worker admission and load-report payloads.
//!
//! Both travel over the registration DEALER/ROUTER channel. The request
//! kind is an explicit tag, so a heartbeat is never mistaken for a join.

use serde::{Deserialize, Serialize};

use dpip_core::WorkerId;

/// First contact from a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub name: String,
    pub load: u64,
    /// Address the worker serves its execution RPC on.
    pub rpc_endpoint: String,
}

/// Periodic load sample from an admitted worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub id: WorkerId,
    pub load: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryRequest {
    Join(JoinRequest),
    Heartbeat(LoadReport),
}

/// Identity handed to a freshly admitted worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinReply {
    pub id: WorkerId,
    pub token: String,
    /// Gateway base URL the worker calls back for images.
    pub api_endpoint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Heartbeat for an id the registry does not know. The worker re-joins.
    UnknownWorker,
    CredentialIssuance,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryReply {
    Joined(JoinReply),
    Ack { message: String },
    Rejected { reason: RejectReason, message: String },
}

impl RegistryReply {
    pub fn rejected(reason: RejectReason, message: impl Into<String>) -> Self {
        Self::Rejected {
            reason,
            message: message.into(),
        }
    }
}
