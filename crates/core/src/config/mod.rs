//! Configuration for every dpip process.
//!
//! One `dpip.toml` describes the channel endpoints, the gateway address and
//! the registry, dispatch and worker tuning knobs. Every field has a default,
//! and `DPIP_<SECTION>_<KEY>` environment variables override the file.

mod helpers;
mod loading;
mod types;
mod validation;


pub use helpers::load_dotenv;
pub use types::{
    ChannelsConfig, DispatchConfig, DpipConfig, GatewayConfig, RegistryConfig, StatusConfig,
    WorkerAgentConfig,
};
