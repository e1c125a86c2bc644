#![allow(dead_code)]

//! WireGuard Peer Registry Service
//!
//! Keeps the authoritative list of WireGuard peers for a server and exposes
//! it to the web UI over a Twirp-style JSON RPC API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    WG PEER REGISTRY                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  HTTP API (9090)          ←── ListPeers/AddPeer/... + /metrics │
//! │  WireGuardService facade  ←── Validation, error mapping     │
//! │  Paginator                ←── Read side (shared lock)       │
//! │  Mutation Coordinator     ←── Write side (exclusive lock)   │
//! │  Peer Store (RocksDB)     ←── Insertion-ordered peer table  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

mod config;
mod types;
mod registry;
mod api;

#[cfg(test)]
mod tests;

use api::{ApiState, Metrics, PeerService};
use config::RegistryConfig;
use registry::{MutationCoordinator, PeerEvent, PeerStore, SharedStore};

/// WireGuard peer registry - peer management API for the WireGuard web UI
#[derive(Parser, Debug)]
#[command(name = "wg-registry")]
#[command(version)]
#[command(about = "Peer registry and management API for a WireGuard server", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "wg-registry.toml")]
    config: PathBuf,

    /// Data directory for the peer store
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// HTTP API port
    #[arg(long)]
    api_port: Option<u16>,

    /// Address the HTTP API binds to
    #[arg(long)]
    bind_address: Option<String>,

    /// Keep peers in memory only
    #[arg(long)]
    in_memory: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into())
        )
        .init();

    info!("🔐 WireGuard Peer Registry v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if args.config.exists() {
        RegistryConfig::load(&args.config)?
    } else {
        warn!("Config file {:?} not found, using defaults", args.config);
        RegistryConfig::default()
    };

    // Override config with CLI args
    let config = config
        .with_api_port(args.api_port)
        .with_bind_address(args.bind_address)
        .with_in_memory(args.in_memory);

    config.validate()?;

    if args.write_default_config {
        config.save(&args.config)?;
        info!("📝 Configuration written to {:?}", args.config);
        return Ok(());
    }

    info!("⚙️  Configuration:");
    info!("   API: {}:{}", config.bind_address, config.api_port);
    info!("   Allowed origins: {}", config.allowed_origins.join(", "));
    info!("   Page size: default {}, max {}", config.default_page_size, config.max_page_size);
    info!("   Request timeout: {}ms", config.request_timeout_ms);
    info!("   Persistence: {}", if config.persist { "rocksdb" } else { "memory only" });

    let shared_config = Arc::new(config);

    // Initialize peer store
    let store = if shared_config.persist {
        tokio::fs::create_dir_all(&args.data_dir).await?;
        let store_path = args.data_dir.join("peer_store");
        let store = PeerStore::open(&store_path)?;
        info!("📦 Peer store opened at {:?}", store_path);
        store
    } else {
        info!("📦 Using in-memory peer store");
        PeerStore::in_memory()
    };
    let store = registry::shared(store);

    // Wire the registry components around the shared store
    let coordinator = Arc::new(MutationCoordinator::new(
        store.clone(),
        shared_config.event_buffer,
    ));
    let service = Arc::new(PeerService::new(
        store.clone(),
        coordinator.clone(),
        &shared_config,
    ));
    let metrics = Arc::new(Metrics::new());

    let api_state = Arc::new(ApiState {
        config: shared_config.clone(),
        service,
        store: store.clone(),
        metrics: metrics.clone(),
    });

    // Start all services concurrently
    let api_handle = tokio::spawn(api::run_api_server(api_state));

    let events_handle = tokio::spawn(run_event_log(coordinator.clone()));

    let maintenance_handle = tokio::spawn(run_maintenance(
        shared_config.clone(),
        store.clone(),
        metrics.clone(),
    ));

    info!("✅ All services started");
    info!("   Press Ctrl+C to shutdown gracefully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
        result = api_handle => {
            error!("HTTP API exited: {:?}", result);
        }
        result = events_handle => {
            error!("Event log exited: {:?}", result);
        }
        result = maintenance_handle => {
            error!("Maintenance task exited: {:?}", result);
        }
    }

    // Graceful shutdown: flush store
    {
        let store = store.read().await;
        store.flush()?;
        if store.is_persistent() {
            info!("📦 Peer store flushed to disk");
        }
    }

    info!("👋 WireGuard Peer Registry shutting down");
    Ok(())
}

/// Log every change published by the coordinator
async fn run_event_log(coordinator: Arc<MutationCoordinator>) -> anyhow::Result<()> {
    let mut events = coordinator.subscribe();

    loop {
        match events.recv().await {
            Ok(PeerEvent::Added(key)) => info!("➕ Peer {} added", key.short()),
            Ok(PeerEvent::Updated(key)) => info!("✏️  Peer {} updated", key.short()),
            Ok(PeerEvent::Removed(key)) => info!("➖ Peer {} removed", key.short()),
            Ok(PeerEvent::Handshake(key)) => debug!("🤝 Peer {} completed a handshake", key.short()),
            Err(RecvError::Lagged(missed)) => {
                warn!("Event log fell behind, {} events dropped", missed);
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

/// Periodic maintenance tasks
async fn run_maintenance(
    config: Arc<RegistryConfig>,
    store: SharedStore,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(
        std::time::Duration::from_secs(config.maintenance_interval_secs)
    );

    loop {
        interval.tick().await;

        let guard = store.read().await;

        if let Err(e) = guard.flush() {
            warn!("Failed to flush peer store: {}", e);
        }

        let stats = guard.stats();
        drop(guard);
        metrics.set_store_stats(&stats);

        info!(
            "📊 Status: {} peers, {} with endpoint, {} with handshake, {} allowed IP ranges",
            stats.total_peers,
            stats.peers_with_endpoint,
            stats.peers_with_handshake,
            stats.allowed_ip_ranges
        );
    }
}
