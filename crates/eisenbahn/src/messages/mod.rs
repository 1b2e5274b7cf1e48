//! Payload types carried inside [`Message`](crate::Message) envelopes.
//!
//! - **Ingest** (`ingest`): workload and image events pushed by the gateway
//! - **Registry** (`registry`): worker join and load-report requests
//! - **Execution** (`execution`): filter calls from the dispatcher to a worker
//! - **Topic constants** (`topics`): canonical topic strings

pub mod execution;
pub mod ingest;
pub mod registry;
pub mod topics;
