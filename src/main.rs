//! Reqbin CLI

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reqbin::config::Config;
use reqbin::server::Server;
use reqbin::BinService;

/// Disposable HTTP request bins with live inspection
#[derive(Debug, Parser)]
#[command(name = "reqbin", version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "REQBIN_CONFIG")]
    config: Option<PathBuf>,

    /// Binding TCP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Binding address
    #[arg(long)]
    host: Option<IpAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reqbin=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    config.validate().context("invalid configuration")?;

    info!(
        addr = %config.server.bind_addr(),
        queue = config.broker.queue_capacity,
        policy = ?config.broker.ingest_policy,
        "Starting reqbin v{}",
        env!("CARGO_PKG_VERSION")
    );

    let shutdown = CancellationToken::new();
    let (service, broker) = BinService::spawn(&config, shutdown.clone());
    let server = Server::new(&config, service, shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Received SIGINT, shutting down");
        signal.cancel();
    });

    let served = server.run().await;
    shutdown.cancel();

    let stats = broker.await.context("broker task failed")?;
    info!(
        processed = stats.processed,
        delivered = stats.delivered,
        dropped = stats.dropped,
        "Broker drained"
    );

    served.context("server failed")?;
    Ok(())
}
