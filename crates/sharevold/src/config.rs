//! Daemon configuration and store-endpoint derivation.
//!
//! All URL assembly for the embedded store lives here: advertise and
//! listen URLs for a member running on this node, and client endpoints
//! derived from orchestrator manager addresses (which arrive in
//! `host:port` form, port being the orchestrator's own RPC port).

use sharevol_proto::defaults::{
    CLUSTER_TOKEN, DEFAULT_CLIENT_PORT, DEFAULT_LISTEN_INTERFACE, DEFAULT_MOUNT_ROOT,
    DEFAULT_PEER_PORT, DEFAULT_SCHEME, DEFAULT_STORE_BIN,
};

/// Runtime configuration of the coordination core.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port store clients connect to.
    pub client_port: u16,
    /// Port store peers connect to.
    pub peer_port: u16,
    /// Interface the store binds to.
    pub listen_interface: String,
    /// URL scheme for store endpoints.
    pub scheme: String,
    /// Token identifying this deployment's store cluster.
    pub cluster_token: String,
    /// Path of the store binary spawned by bootstrap.
    pub store_bin: String,
    /// Root under which served volumes are mounted and exported.
    pub mount_root: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_port: DEFAULT_CLIENT_PORT,
            peer_port: DEFAULT_PEER_PORT,
            listen_interface: DEFAULT_LISTEN_INTERFACE.to_string(),
            scheme: DEFAULT_SCHEME.to_string(),
            cluster_token: CLUSTER_TOKEN.to_string(),
            store_bin: DEFAULT_STORE_BIN.to_string(),
            mount_root: DEFAULT_MOUNT_ROOT.to_string(),
        }
    }
}

impl Config {
    /// Client URL a node at `host` advertises.
    pub fn client_url(&self, host: &str) -> String {
        format!("{}{}:{}", self.scheme, host, self.client_port)
    }

    /// Peer URL a node at `host` advertises.
    pub fn peer_url(&self, host: &str) -> String {
        format!("{}{}:{}", self.scheme, host, self.peer_port)
    }

    /// Client URL the local store member listens on.
    pub fn listen_client_url(&self) -> String {
        self.client_url(&self.listen_interface)
    }

    /// Peer URL the local store member listens on.
    pub fn listen_peer_url(&self) -> String {
        self.peer_url(&self.listen_interface)
    }

    /// Store client endpoint for an orchestrator manager address.
    ///
    /// Manager addresses come as `host:port` with the orchestrator's
    /// management port; the store listens on its own client port.
    pub fn endpoint_for(&self, manager_addr: &str) -> String {
        self.client_url(host_of(manager_addr))
    }
}

/// Strip the port off a `host:port` address; plain hosts pass through.
pub fn host_of(addr: &str) -> &str {
    addr.split(':').next().unwrap_or(addr)
}
