//! Cluster-shared volume plugin daemon (sharevold).
//!
//! Grants every host in a container-orchestration cluster simultaneous
//! access to the same logical volume by multiplexing a single-writer
//! block volume behind a per-volume SMB server. This daemon runs the
//! distributed coordination core:
//! 1. Bootstrap of the embedded replicated store (managers only)
//! 2. Typed volume-metadata facade over that store
//! 3. Refcount watcher electing one SMB-serving host per volume
//!
//! The volume-driver HTTP surface mounts on top of the metadata facade
//! exposed through the core handle.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use sharevol_proto::defaults::{
    CLUSTER_TOKEN, DEFAULT_CLIENT_PORT, DEFAULT_LISTEN_INTERFACE, DEFAULT_MOUNT_ROOT,
    DEFAULT_PEER_PORT, DEFAULT_STORE_BIN,
};

use sharevold::config::Config;
use sharevold::smb::{SmbController, UserShareController};
use sharevold::topology::TopologyOracle;
use sharevold::{bootstrap, topology};

/// Cluster-shared volume plugin daemon
#[derive(Parser, Debug)]
#[command(name = "sharevold", version, about = "Cluster-shared volume plugin daemon")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Topology oracle to use: "swarm" (Docker Swarm) or "local"
    /// (fixed single-node, for development)
    #[arg(long, default_value = "swarm")]
    oracle: String,

    /// Node id reported by the local oracle
    #[arg(long, default_value = "local-node")]
    node_id: String,

    /// Node address reported by the local oracle
    #[arg(long, default_value = "127.0.0.1")]
    node_addr: String,

    /// Store client port
    #[arg(long, default_value_t = DEFAULT_CLIENT_PORT)]
    client_port: u16,

    /// Store peer port
    #[arg(long, default_value_t = DEFAULT_PEER_PORT)]
    peer_port: u16,

    /// Interface the store binds to
    #[arg(long, default_value = DEFAULT_LISTEN_INTERFACE)]
    listen_interface: String,

    /// Token identifying this deployment's store cluster
    #[arg(long, default_value = CLUSTER_TOKEN)]
    cluster_token: String,

    /// Path of the store binary
    #[arg(long, default_value = DEFAULT_STORE_BIN)]
    store_bin: String,

    /// Root under which served volumes are mounted and exported
    #[arg(long, default_value = DEFAULT_MOUNT_ROOT)]
    mount_root: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("sharevold v{} starting", env!("CARGO_PKG_VERSION"));

    let cfg = Config {
        client_port: args.client_port,
        peer_port: args.peer_port,
        listen_interface: args.listen_interface.clone(),
        cluster_token: args.cluster_token.clone(),
        store_bin: args.store_bin.clone(),
        mount_root: args.mount_root.clone(),
        ..Config::default()
    };

    // ---------------------------------------------------------------
    // Create topology oracle
    // ---------------------------------------------------------------
    let oracle: Arc<dyn TopologyOracle> = match args.oracle.as_str() {
        "local" => {
            info!("using local topology oracle (single-node mode)");
            Arc::new(topology::local::LocalOracle::new(
                args.node_id.clone(),
                args.node_addr.clone(),
            ))
        }
        "swarm" | _ => {
            if args.oracle != "swarm" {
                warn!("unknown oracle '{}', falling back to 'swarm'", args.oracle);
            }
            match topology::swarm::SwarmOracle::connect() {
                Ok(oracle) => Arc::new(oracle),
                Err(e) => {
                    error!("cannot reach the Docker daemon: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };

    let smb: Arc<dyn SmbController> = Arc::new(UserShareController::new(&cfg.mount_root));

    // ---------------------------------------------------------------
    // Bootstrap the coordination core
    // ---------------------------------------------------------------
    let core = match bootstrap::bootstrap(&cfg, oracle.as_ref(), smb).await {
        Ok(core) => core,
        Err(e) => {
            // The daemon stays up; volume operations surface store
            // errors until an operator restarts it.
            error!("bootstrap failed: {}", e);
            None
        }
    };

    match &core {
        Some(_) => info!("coordination core running"),
        None => info!("no coordination core on this node"),
    }

    // Wait for shutdown signal
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for SIGINT: {}", e);
    } else {
        info!("SIGINT received, shutting down");
    }

    // ---------------------------------------------------------------
    // Graceful shutdown
    // ---------------------------------------------------------------
    if let Some(core) = core {
        core.shutdown().await;
    }

    info!("sharevold stopped");
}
