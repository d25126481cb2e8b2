//! Collection log indexer binary
//!
//! Follows the chain, fetching only logs emitted by watched contracts, and
//! grows the watched set from factory creation events and the contract store.

use anyhow::{Context, Result};
use clap::Parser;
use sieve::config::Config;
use sieve::registry::AddressRegistry;
use sieve::rpc::RpcClient;
use sieve::store::{RocksContractStore, StoreSource};
use sieve::sync::ExternalSync;
use sieve::watcher::Watcher;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Collection log indexer
#[derive(Parser)]
#[command(name = "sieve")]
#[command(about = "Index logs of factory-created collection contracts")]
struct Args {
    /// RPC endpoint URL (e.g., https://sepolia.base.org)
    #[arg(short, long, default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// Path to the network configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Path to RocksDB database directory
    #[arg(short, long, default_value = "./sieve_db")]
    db_path: PathBuf,

    /// Re-scan for creation events from this block before following the chain
    #[arg(long)]
    backfill_from: Option<u64>,

    /// Serve contractctl commands on this address (e.g., 127.0.0.1:9090)
    #[arg(long)]
    admin_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    info!("Starting collection indexer");
    info!("Network: {} (chain {})", config.network, config.chain_id);
    info!("RPC URL: {}", args.rpc_url);
    info!("Database: {:?}", args.db_path);

    let rpc = RpcClient::new(args.rpc_url);
    let store = Arc::new(
        RocksContractStore::open(&args.db_path)
            .with_context(|| format!("Failed to open database at {:?}", args.db_path))?,
    );
    let registry = Arc::new(AddressRegistry::from_config(&config));

    let mut watcher = Watcher::new(config.clone(), Arc::clone(&registry), Arc::clone(&store), rpc);
    watcher
        .initialize()
        .await
        .context("Failed to initialize watcher")?;

    if let Some(from) = args.backfill_from {
        let to = watcher.next_block().saturating_sub(1);
        let summary = watcher
            .backfill(from, to)
            .await
            .context("Backfill failed")?;
        info!(
            "Backfill found {} creation events ({} new contracts)",
            summary.discovered, summary.added
        );
    }

    let cancel = CancellationToken::new();
    let source = StoreSource::new(Arc::clone(&store), config.chain_id);

    let sync_task = {
        let sync = ExternalSync::new(Arc::clone(&registry), config.sync);
        let source = source.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sync.run_loop(cancel, &source).await })
    };

    let watch_task = {
        let sync = ExternalSync::new(Arc::clone(&registry), config.sync);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = sync.run_watch(cancel, &source).await {
                warn!("{:#}", e);
            }
        })
    };

    let admin_task = match args.admin_addr {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind admin endpoint on {}", addr))?;
            let store = Arc::clone(&store);
            let cancel = cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = sieve::admin::serve(listener, store, cancel).await {
                    warn!("{:#}", e);
                }
            }))
        }
        None => None,
    };

    // Handle Ctrl+C gracefully
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, shutting down gracefully...");
                    cancel.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
            }
        });
    }

    watcher.run(cancel.clone()).await;

    sync_task.await.context("Store sync task panicked")?;
    watch_task.await.context("Change feed task panicked")?;
    if let Some(task) = admin_task {
        task.await.context("Admin endpoint task panicked")?;
    }

    let stats = registry.stats();
    info!(
        "Indexer stopped: {} contracts watched ({} discovered or synced)",
        stats.total_watched, stats.dynamic_count
    );
    Ok(())
}
