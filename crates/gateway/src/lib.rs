//! Client side of the HTTP gateway that owns workloads and image storage.
//!
//! The core never stores image bytes; it logs in, fetches and uploads
//! through the [`Gateway`] trait. [`HttpGateway`] speaks the gateway's
//! HTTP API, [`MemoryGateway`] keeps everything in process for tests and
//! local runs, and [`EventPublisher`] pushes the workload and image events
//! the controller ingests.

pub mod error;
#[cfg(feature = "fake-server")]
pub mod fake;
pub mod http;
pub mod memory;
pub mod publisher;
pub mod traits;

pub use error::GatewayError;
pub use http::HttpGateway;
pub use memory::MemoryGateway;
pub use publisher::EventPublisher;
pub use traits::{FetchedImage, Gateway, GatewayFactory};
