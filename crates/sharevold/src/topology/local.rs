//! Local (single-node) topology oracle.
//!
//! This oracle is designed for development and testing. It reports a
//! fixed identity: the node is always the leader of a one-manager
//! cluster, so bootstrap always takes the form-new-cluster path.

use async_trait::async_trait;

use sharevol_proto::error::SvResult;
use sharevol_proto::node::{NodeInfo, NodeRole};

use super::TopologyOracle;

/// A single-node oracle with a fixed answer.
pub struct LocalOracle {
    node: NodeInfo,
}

impl LocalOracle {
    /// Create an oracle that reports `id`/`addr` as the cluster leader.
    pub fn new(id: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            node: NodeInfo {
                id: id.into(),
                addr: addr.into(),
                role: NodeRole::Leader,
            },
        }
    }

    /// Same oracle with a different role (test setup).
    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.node.role = role;
        self
    }
}

#[async_trait]
impl TopologyOracle for LocalOracle {
    fn name(&self) -> &str {
        "local"
    }

    async fn local_node(&self) -> SvResult<NodeInfo> {
        Ok(self.node.clone())
    }

    async fn leader(&self) -> SvResult<String> {
        Ok(self.node.addr.clone())
    }

    async fn managers(&self) -> SvResult<Vec<String>> {
        Ok(vec![self.node.addr.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_oracle_defaults_to_leader() {
        let oracle = LocalOracle::new("n1", "127.0.0.1");
        let node = oracle.local_node().await.unwrap();
        assert_eq!(node.role, NodeRole::Leader);
        assert_eq!(oracle.leader().await.unwrap(), "127.0.0.1");
        assert_eq!(oracle.managers().await.unwrap(), vec!["127.0.0.1"]);
    }

    #[tokio::test]
    async fn test_local_oracle_role_override() {
        let oracle = LocalOracle::new("n2", "10.0.0.9").with_role(NodeRole::Worker);
        let node = oracle.local_node().await.unwrap();
        assert_eq!(node.role, NodeRole::Worker);
    }
}
