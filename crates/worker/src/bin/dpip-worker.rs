//! dpip-worker: joins the controller and serves filter requests.
//!
//! # Usage
//!
//! ```bash
//! # Defaults, or ./dpip.toml when present
//! dpip-worker
//!
//! # Named worker on a fixed port
//! dpip-worker --name gpu-1 --rpc-port 50060
//!
//! # Via environment variables
//! DPIP_CHANNELS_REGISTRY=tcp://controller:40901 DPIP_WORKER_NAME=w2 dpip-worker
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use dpip_core::config::load_dotenv;
use dpip_core::DpipConfig;
use dpip_eisenbahn::{EisenbahnError, RequestHandler, Transport, ZmqRequestClient, ZmqRequestServer};
use dpip_gateway::{Gateway, GatewayError, GatewayFactory, HttpGateway};
use dpip_worker::port::first_free_port;
use dpip_worker::{serve, AgentError, ImageFilters, ProcStatSampler, WorkerAgent};

/// Filter worker for the distributed image pipeline.
#[derive(Parser, Debug)]
#[command(name = "dpip-worker", version, about)]
struct Cli {
    /// Path to the TOML config file. Missing file means defaults.
    #[arg(long, env = "DPIP_CONFIG", default_value = "dpip.toml")]
    config: PathBuf,

    /// Name to register under.
    #[arg(long)]
    name: Option<String>,

    /// Serve the execution RPC on this port instead of scanning for a free one.
    #[arg(long)]
    rpc_port: Option<u16>,
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
    tracing::info!(?cli, "starting dpip-worker");

    let mut config = DpipConfig::load(&cli.config)?;
    if let Some(name) = cli.name {
        config.worker.name = name;
    }
    if cli.rpc_port.is_some() {
        config.worker.rpc_port = cli.rpc_port;
    }
    config.log_summary();
    let worker = config.worker.clone();

    let port = match worker.rpc_port {
        Some(port) => port,
        None => first_free_port(&worker.rpc_host, worker.rpc_base_port)?,
    };
    let rpc_endpoint = format!("tcp://{}:{port}", worker.rpc_host);
    let server: Arc<dyn RequestHandler> =
        Arc::new(ZmqRequestServer::bind(&Transport::from_endpoint(&rpc_endpoint)?).await?);
    tracing::info!(%rpc_endpoint, "execution RPC bound");

    // An unreachable controller counts against the join timeout.
    let registry_transport = Transport::from_endpoint(&config.channels.registry)?;
    let registry = match ZmqRequestClient::connect_within(&registry_transport, worker.join_timeout()).await {
        Ok(client) => Arc::new(client),
        Err(EisenbahnError::Timeout(d)) => return Err(AgentError::JoinTimeout(d).into()),
        Err(e) => return Err(e.into()),
    };

    let gateway_timeout = config.gateway.timeout();
    let gateways: GatewayFactory = Arc::new(move |base_url: &str| -> Result<Arc<dyn Gateway>, GatewayError> {
        Ok(Arc::new(HttpGateway::new(base_url, gateway_timeout)?) as Arc<dyn Gateway>)
    });

    let agent = Arc::new(WorkerAgent::new(
        worker.clone(),
        rpc_endpoint,
        registry,
        Arc::new(ProcStatSampler::default()),
        Arc::new(ImageFilters::new(worker.blur_sigma)),
        gateways,
    ));

    // Without an id and token there is nothing useful to do.
    let id = agent.join_cluster().await?;
    tracing::info!(worker_id = id, name = %worker.name, "registered");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let heartbeat = tokio::spawn(Arc::clone(&agent).run_heartbeat(shutdown_rx.clone()));
    let rpc = tokio::spawn(serve(server, agent, shutdown_rx));

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    for task in [heartbeat, rpc] {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "worker task panicked");
        }
    }

    tracing::info!("dpip-worker exited cleanly");
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
