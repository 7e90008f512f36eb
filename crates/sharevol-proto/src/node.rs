/// Node identity and orchestrator role types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of this node as assigned by the orchestrator.
///
/// Only managers participate in the replicated store; only the leader
/// forms a new store cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// Plain worker. Runs no store member locally.
    Worker,
    /// Manager that is not the current leader.
    Manager,
    /// The current cluster leader.
    Leader,
}

impl NodeRole {
    /// Whether a node with this role runs a local store member.
    pub fn runs_store(&self) -> bool {
        !matches!(self, NodeRole::Worker)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeRole::Worker => "worker",
            NodeRole::Manager => "manager",
            NodeRole::Leader => "leader",
        };
        write!(f, "{}", s)
    }
}

/// Identity of this node as reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Orchestrator-assigned node id; doubles as the store member name.
    pub id: String,
    /// Address the node advertises to the cluster (no port).
    pub addr: String,
    /// Current role.
    pub role: NodeRole,
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.id, self.addr, self.role)
    }
}
