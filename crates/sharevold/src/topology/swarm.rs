//! Docker Swarm topology oracle.
//!
//! Reads this node's role from `docker info` (a manager has
//! `control_available` set) and resolves leadership by scanning the
//! node list for the entry whose manager status carries the leader
//! flag. Remote manager addresses come back in `host:port` form, port
//! being the Swarm management port, while this node's own entry is a
//! bare host; callers strip the port when deriving store endpoints.

use async_trait::async_trait;
use bollard::Docker;
use tracing::debug;

use sharevol_proto::error::{SvError, SvResult};
use sharevol_proto::node::{NodeInfo, NodeRole};

use super::TopologyOracle;
use crate::config::host_of;

/// Oracle backed by the local Docker daemon.
pub struct SwarmOracle {
    docker: Docker,
}

impl SwarmOracle {
    /// Connect to the local Docker daemon with default settings.
    pub fn connect() -> SvResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SvError::Orchestrator(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Swarm section of `docker info`, or an error if the daemon is
    /// unreachable or the node is not part of a swarm.
    async fn swarm_info(&self) -> SvResult<bollard::models::SwarmInfo> {
        let info = self
            .docker
            .info()
            .await
            .map_err(|e| SvError::Orchestrator(e.to_string()))?;
        info.swarm
            .ok_or_else(|| SvError::Orchestrator("node is not part of a swarm".into()))
    }

    /// Whether the node list marks `node_id` as the current leader.
    async fn is_leader(&self, node_id: &str) -> SvResult<bool> {
        let nodes = self
            .docker
            .list_nodes(None)
            .await
            .map_err(|e| SvError::Orchestrator(e.to_string()))?;

        Ok(nodes.iter().any(|n| {
            n.id.as_deref() == Some(node_id)
                && n.manager_status
                    .as_ref()
                    .and_then(|m| m.leader)
                    .unwrap_or(false)
        }))
    }
}

#[async_trait]
impl TopologyOracle for SwarmOracle {
    fn name(&self) -> &str {
        "swarm"
    }

    async fn local_node(&self) -> SvResult<NodeInfo> {
        let swarm = self.swarm_info().await?;
        let id = swarm
            .node_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SvError::Orchestrator("swarm reports no node id".into()))?;
        let addr = swarm
            .node_addr
            .filter(|addr| !addr.is_empty())
            .ok_or_else(|| SvError::Orchestrator("swarm reports no node address".into()))?;

        let role = if !swarm.control_available.unwrap_or(false) {
            NodeRole::Worker
        } else if self.is_leader(&id).await? {
            NodeRole::Leader
        } else {
            NodeRole::Manager
        };

        debug!("swarm node {} ({}) role: {}", id, addr, role);
        Ok(NodeInfo { id, addr, role })
    }

    async fn leader(&self) -> SvResult<String> {
        let nodes = self
            .docker
            .list_nodes(None)
            .await
            .map_err(|e| SvError::Orchestrator(e.to_string()))?;

        nodes
            .iter()
            .find_map(|n| {
                let status = n.manager_status.as_ref()?;
                if status.leader.unwrap_or(false) {
                    status.addr.clone()
                } else {
                    None
                }
            })
            .ok_or(SvError::NoLeader)
    }

    async fn managers(&self) -> SvResult<Vec<String>> {
        let swarm = self.swarm_info().await?;
        let mut managers: Vec<String> = swarm
            .remote_managers
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.addr)
            .collect();

        // On a lone manager the remote-manager list can be empty or
        // omit this node, so merge in our own address. Remote entries
        // are `host:port` while the node address is a bare host;
        // compare by host.
        if swarm.control_available.unwrap_or(false) {
            if let Some(addr) = swarm.node_addr.filter(|a| !a.is_empty()) {
                if !managers.iter().any(|m| host_of(m) == host_of(&addr)) {
                    managers.push(addr);
                }
            }
        }

        if managers.is_empty() {
            return Err(SvError::Orchestrator("swarm reports no managers".into()));
        }
        Ok(managers)
    }
}
