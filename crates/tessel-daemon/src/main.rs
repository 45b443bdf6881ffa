// crates/tessel-daemon/src/main.rs
//
// Binary entrypoint for the Tessel daemon.
//
// Initializes tracing, parses CLI arguments, loads configuration, builds the
// storage engine (store nodes only), peer membership, node registry, repair
// queue and coordinator, then serves JSON-RPC and runs the background loops
// until Ctrl-C.

mod config;
mod loops;
mod peers;
mod state;

use std::sync::Arc;

use clap::Parser;
use config::DaemonConfig;
use peers::PeerMembers;
use state::{NodeState, NodeStateMachine};

use tessel_cluster::{ClusterNodeFactory, NodeRegistry, RpcClient, VirtualNode};
use tessel_core::PeerType;
use tessel_farm::Farm;
use tessel_rpc::{NodeInfo, RpcConfig, TesselRpcServer};
use tessel_store::BucketStore;
use tessel_sync::{RepairQueue, Repairer};

/// Tessel daemon: a store or client node of a replicated key/field store.
#[derive(Parser, Debug)]
#[command(name = "tessel-daemon", version = "0.1.0", about = "Tessel node daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.tessel/config.toml")]
    config: String,

    /// Node type to run: store or client. Overrides the config file.
    #[arg(long)]
    node_type: Option<String>,

    /// RPC port. Overrides the config file.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // The configured log level is the fallback filter, so load before
    // installing the subscriber and report the outcome afterwards.
    let config_path = expand_tilde(&args.config);
    let loaded = DaemonConfig::load(&config_path);
    let log_level = loaded
        .as_ref()
        .map(|cfg| cfg.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    let mut daemon_config = match loaded {
        Ok(cfg) => {
            tracing::info!("Loaded configuration from {}", config_path);
            cfg
        }
        Err(e) => {
            tracing::warn!(
                "Could not load config from {}: {}. Using defaults.",
                config_path,
                e
            );
            DaemonConfig::default()
        }
    };

    if let Some(node_type) = args.node_type {
        daemon_config.node_type = node_type;
    }
    if let Some(port) = args.port {
        daemon_config.rpc_port = port;
    }
    daemon_config.validate()?;
    let node_type = daemon_config.peer_type()?;

    tracing::info!("Tessel Daemon v0.1.0");
    tracing::info!("Node type: {}", node_type);
    tracing::info!("Self URL: {}", daemon_config.self_url);
    tracing::info!(
        "RPC endpoint: {}:{}",
        daemon_config.rpc_host,
        daemon_config.rpc_port
    );

    let mut state_machine = NodeStateMachine::new();
    let client = RpcClient::new(daemon_config.request_timeout());

    // Store nodes hold data and answer for themselves in-process.
    let (store, local) = match node_type {
        PeerType::Store => {
            let store = Arc::new(BucketStore::new(daemon_config.store_buckets));
            let local = Arc::new(VirtualNode::new(daemon_config.self_url.clone(), store.clone()));
            tracing::info!("Storage engine ready with {} buckets", daemon_config.store_buckets);
            (Some(store), Some(local))
        }
        PeerType::Client => (None, None),
    };

    let peers = Arc::new(PeerMembers::new(
        daemon_config.self_url.clone(),
        node_type,
        &daemon_config.peers,
        client.clone(),
    ));
    let registry = Arc::new(NodeRegistry::new(
        daemon_config.registry_config(),
        peers.clone(),
        Arc::new(ClusterNodeFactory::new(local, client)),
    ));
    registry.start().await;

    let repair = RepairQueue::start(
        Arc::new(Repairer::new(registry.clone())),
        daemon_config.repair_queue_capacity,
        daemon_config.repair_workers,
    );
    let farm = Farm::new(registry.clone(), repair);

    let rpc_config = RpcConfig {
        host: daemon_config.rpc_host.clone(),
        port: daemon_config.rpc_port,
    };
    let node_info = NodeInfo {
        url: daemon_config.self_url.clone(),
        node_type,
    };
    let mut rpc_server = TesselRpcServer::new(rpc_config, node_info)
        .with_farm(farm)
        .with_gossip_handler(peers.delivery())
        .with_announce_callback(peers.announce_callback());
    if let Some(store) = store {
        rpc_server = rpc_server.with_store(store);
    }

    tokio::spawn(async move {
        if let Err(e) = rpc_server.start().await {
            tracing::error!("RPC server error: {}", e);
        }
    });

    state_machine.transition(NodeState::Joining)?;
    tracing::info!(
        "Announcing to {} configured peers",
        daemon_config.peers.len()
    );
    peers.announce_to_all().await;
    if let Err(e) = registry.update().await {
        tracing::warn!("Initial ring update failed: {}", e);
    }

    let discovery_registry = registry.clone();
    let discovery_ms = daemon_config.discovery_interval_ms;
    tokio::spawn(async move {
        loops::run_discovery_loop(discovery_registry, discovery_ms).await;
    });

    let broadcast_registry = registry.clone();
    let broadcast_ms = daemon_config.broadcast_interval_ms;
    tokio::spawn(async move {
        loops::run_broadcast_loop(broadcast_registry, broadcast_ms).await;
    });

    let announce_peers = peers.clone();
    let announce_ms = daemon_config.announce_interval_ms;
    tokio::spawn(async move {
        loops::run_announce_loop(announce_peers, announce_ms).await;
    });

    state_machine.transition(NodeState::Ready)?;
    tracing::info!("Tessel daemon ready. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    let _ = state_machine.transition(NodeState::ShuttingDown);
    registry.stop().await;
    tracing::info!("Tessel daemon shut down gracefully");

    Ok(())
}

/// Expand a leading `~/` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{}", home.display(), &path[1..]);
        }
    }
    path.to_string()
}
