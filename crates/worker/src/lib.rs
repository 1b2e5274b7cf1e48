//! The dpip worker agent.
//!
//! A worker joins the controller's registry, reports its load on an
//! interval, and serves the execution RPC: fetch an image from the
//! gateway, filter it, upload the result.

pub mod agent;
pub mod error;
pub mod filters;
pub mod load;
pub mod port;
pub mod rpc;

pub use agent::{AgentStatus, WorkerAgent};
pub use error::{AgentError, FilterError};
pub use filters::{FilterEngine, ImageFilters};
pub use load::{FixedLoad, LoadSampler, ProcStatSampler};
pub use rpc::{route, serve, FilterRpc};
