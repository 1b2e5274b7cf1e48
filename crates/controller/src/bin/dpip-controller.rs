//! dpip-controller: worker registry, event ingestion and job dispatch.
//!
//! Binds the workload, image, registry and dispatcher channels, then runs
//! until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! # Defaults, or ./dpip.toml when present
//! dpip-controller
//!
//! # Explicit config and status endpoint
//! dpip-controller --config /etc/dpip/dpip.toml --status-port 8090
//!
//! # Via environment variables
//! DPIP_CHANNELS_REGISTRY=tcp://0.0.0.0:40901 DPIP_GATEWAY_BASE_URL=http://gw:8080 dpip-controller
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use dpip_controller::{Controller, ZmqExecutionClient};
use dpip_core::config::load_dotenv;
use dpip_core::DpipConfig;
use dpip_gateway::HttpGateway;

/// Registry, ingestion and dispatch for the distributed image pipeline.
#[derive(Parser, Debug)]
#[command(name = "dpip-controller", version, about)]
struct Cli {
    /// Path to the TOML config file. Missing file means defaults.
    #[arg(long, env = "DPIP_CONFIG", default_value = "dpip.toml")]
    config: PathBuf,

    /// Serve the status endpoint on this port.
    #[arg(long)]
    status_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting dpip-controller");

    let mut config = DpipConfig::load(&cli.config)?;
    if cli.status_port.is_some() {
        config.status.port = cli.status_port;
    }
    config.log_summary();

    let gateway = Arc::new(HttpGateway::new(&config.gateway.base_url, config.gateway.timeout())?);
    let client = Arc::new(ZmqExecutionClient::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = Controller::start(&config, gateway, client, shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    handle.join().await;

    tracing::info!("dpip-controller exited cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler, waiting for ctrl-c");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
