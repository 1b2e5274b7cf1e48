//! The dpip controller: worker registry, event ingestion and job dispatch.
//!
//! Gateway events arrive on PULL sockets and feed [`Ingestion`], which
//! mirrors workloads and images and discovers jobs. Discovered jobs go
//! through a queue to the [`Dispatcher`], which picks the least-loaded
//! worker from the [`WorkerRegistry`] and calls its execution RPC.

pub mod dispatcher;
pub mod error;
pub mod ingestion;
pub mod registry;
pub mod service;
pub mod status;

pub use dispatcher::{select_worker, Dispatched, Dispatcher, ExecutionClient, ZmqExecutionClient};
pub use error::{ControllerError, DispatchError, RegistryError};
pub use ingestion::Ingestion;
pub use registry::WorkerRegistry;
pub use service::{Controller, ControllerHandle};
