//! Topology oracles: the plugin's view of the host orchestrator.
//!
//! The oracle reports this node's identity and role, the current
//! cluster leader, and the set of manager addresses. Bootstrap uses it
//! to decide whether to form, join, or stay out of the store cluster;
//! the metadata facade uses it indirectly through the endpoint list
//! derived at startup.
//!
//! Two implementations are provided:
//! - `swarm`: queries the local Docker daemon for Swarm topology.
//! - `local`: fixed single-node answers for development/testing.

use async_trait::async_trait;

use sharevol_proto::error::SvResult;
use sharevol_proto::node::NodeInfo;

pub mod local;
pub mod swarm;

/// Trait that all topology oracle backends must implement.
///
/// Failures to reach the orchestrator surface as
/// `SvError::Orchestrator`; callers treat them as fatal for their own
/// startup but must never take the process down.
#[async_trait]
pub trait TopologyOracle: Send + Sync {
    /// Human-readable name of this oracle (e.g. "swarm", "local").
    fn name(&self) -> &str;

    /// Identity and role of the node this process runs on.
    async fn local_node(&self) -> SvResult<NodeInfo>;

    /// Address of the current cluster leader, `SvError::NoLeader` if
    /// there is none.
    async fn leader(&self) -> SvResult<String>;

    /// Addresses of all managers, including this node if it is one.
    async fn managers(&self) -> SvResult<Vec<String>>;
}
