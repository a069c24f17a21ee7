//! Withdrawal orchestrator service.
//!
//! # Architecture Overview
//!
//! ```text
//!   HTTP client
//!       │
//!       ▼
//!   http ──▶ WithdrawalService ──▶ WithdrawalCoordinator ──▶ JobStore
//!                   │                        │                  │
//!                   ▼                        ▼                  │
//!           TxBuilder · NonceManager · ConfirmationTracker      │
//!                   │                                           │
//!                   ▼                                           │
//!            RpcChainClient ◀──────────── ResumeMonitor ◀───────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use withdrawal_orchestrator::blockchain::{ChainClient, NameResolver, RpcChainClient};
use withdrawal_orchestrator::config::{load_config, loader::default_config};
use withdrawal_orchestrator::lifecycle::signals::spawn_signal_handler;
use withdrawal_orchestrator::observability::{logging, metrics};
use withdrawal_orchestrator::withdrawals::{JobStore, ResumeMonitor};
use withdrawal_orchestrator::{HttpServer, Shutdown, WithdrawalService};

#[derive(Parser)]
#[command(name = "withdrawal-orchestrator")]
#[command(about = "Ethereum withdrawal orchestration service", long_about = None)]
struct Args {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path),
        None => default_config(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging("info");
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!("withdrawal-orchestrator v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.server.bind_address,
        chain_id = config.blockchain.chain_id,
        claim_policy = ?config.warehouse.claim_policy,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let client: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(config.blockchain.clone()).await?);
    let resolver = Arc::new(NameResolver::from_config(&config.resolver, client.clone())?);

    let store = match &config.warehouse.job_store_path {
        Some(path) => JobStore::load_from_file(path)?,
        None => JobStore::in_memory(),
    };

    let service = Arc::new(WithdrawalService::new(client, resolver, store, &config)?);

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let monitor = ResumeMonitor::new(
        service.coordinator(),
        Duration::from_millis(config.warehouse.resume_interval_ms),
        config.retries.clone(),
    );
    let monitor_task = tokio::spawn(monitor.run(shutdown.subscribe()));

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let server = HttpServer::new(service, &config.server);
    server.run(listener, shutdown.subscribe()).await?;

    // The server also stops on its own errors; make sure the monitor follows.
    shutdown.trigger();
    if let Err(e) = monitor_task.await {
        tracing::error!(error = %e, "Resume monitor task failed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
