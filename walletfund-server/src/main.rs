//! Wallet funding scan service.
//!
//! Consumes wallet funding requests from the private "scan" queue,
//! scans chain data for outputs owned by the destination wallet, and
//! drives every request to a terminal completion on the public bus.

mod api;
mod config;
mod shutdown;

use crate::api::{AppState, build_router};
use crate::config::Config;
use crate::shutdown::shutdown_signal;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use walletfund_core::chain::ChainClient;
use walletfund_core::matcher::DerivationMatcher;
use walletfund_core::pool::WorkerPool;
use walletfund_core::queue::Bus;
use walletfund_core::worker::{ScanWorker, WorkerQueues};

/// Wallet funding scan service
#[derive(Parser, Debug)]
#[command(name = "walletfund-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Override the number of worker contexts
    #[arg(short, long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting walletfund-server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    // Two independent logical buses with their own lifecycles: results
    // visible to requesters never share a channel with internal work.
    let private_bus = Bus::new("private");
    let public_bus = Bus::new("public");
    tracing::info!(
        host = %config.private_bus.host,
        user = %config.private_bus.username,
        "Private bus ready"
    );
    tracing::info!(
        host = %config.public_bus.host,
        user = %config.public_bus.username,
        "Public bus ready"
    );

    let chain = Arc::new(ChainClient::new(&config.header_url, &config.sync_url));
    let matcher = Arc::new(DerivationMatcher);
    let policy = config.policy();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = {
        let config = config.clone();
        let private_bus = private_bus.clone();
        let public_bus = public_bus.clone();
        let chain = Arc::clone(&chain);
        let matcher = Arc::clone(&matcher);
        let worker_shutdown = shutdown_rx.clone();

        WorkerPool::new(config.workers, move |id| {
            // Each context opens its own set of bus handles.
            let queues = WorkerQueues {
                scan: private_bus.queue(&config.scan_queue),
                send: private_bus.queue(&config.send_queue),
                complete: public_bus.queue(&config.complete_queue),
                dead_letter: private_bus.queue(&config.dead_letter_queue),
            };
            ScanWorker::new(id, Arc::clone(&chain), Arc::clone(&matcher), policy, queues)
                .run(worker_shutdown.clone())
        })
    };
    let pool_handle = tokio::spawn(pool.run(shutdown_rx));

    let state = AppState {
        scan: private_bus.queue(&config.scan_queue),
        complete: public_bus.queue(&config.complete_queue),
    };
    let router = build_router(state);

    let listener = TcpListener::bind(config.listen).await?;
    tracing::info!("HTTP ingress listening on {}", config.listen);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The ingress has stopped; drain the pipeline and wait for it.
    let _ = shutdown_tx.send(true);
    let _ = pool_handle.await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
