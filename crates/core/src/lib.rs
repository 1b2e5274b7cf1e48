pub mod config;
pub mod error;
pub mod job;
pub mod worker;
pub mod workload;

pub use config::DpipConfig;
pub use error::*;
pub use job::*;
pub use worker::*;
pub use workload::*;
