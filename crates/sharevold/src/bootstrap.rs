//! Store-cluster bootstrap.
//!
//! Runs once at startup. Workers run no store member and return
//! immediately. The orchestrator leader forms a new single-member
//! store cluster; every other manager joins the existing one.
//!
//! The store data directory is ephemeral, so a manager whose previous
//! membership record is still in the cluster cannot re-join under the
//! same identity: the stale record is removed first. A record with an
//! empty name is a reservation left by an aborted join and can be
//! inherited instead.

use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sharevol_proto::defaults::{
    CHECK_SLEEP, CLUSTER_STATE_EXISTING, CLUSTER_STATE_NEW, PREFIX_GREF, REQUEST_TIMEOUT,
};
use sharevol_proto::error::{SvError, SvResult};
use sharevol_proto::node::{NodeInfo, NodeRole};

use crate::config::{host_of, Config};
use crate::metadata::VolumeMeta;
use crate::smb::SmbController;
use crate::store::etcd::{EtcdBackend, EtcdConnector};
use crate::store::{KvBackend, StoreMember};
use crate::topology::TopologyOracle;
use crate::watcher::RefcountWatcher;

/// Running coordination core on a manager node.
///
/// Owns the store subprocess and the watcher task; dropping it leaves
/// both running, call [`CoreHandle::shutdown`] for a clean stop.
pub struct CoreHandle {
    /// Metadata facade handed to the volume-driver layer.
    pub meta: VolumeMeta,
    store_child: Child,
    shutdown: Arc<Notify>,
    watcher_task: JoinHandle<()>,
}

impl CoreHandle {
    /// Stop the watcher, then the store member.
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        if let Err(e) = (&mut self.watcher_task).await {
            warn!("refcount watcher did not stop cleanly: {}", e);
        }
        if let Err(e) = self.store_child.kill().await {
            warn!("failed to stop store process: {}", e);
        }
    }
}

/// Start or join the store cluster as dictated by this node's role.
///
/// Returns `None` on workers. Orchestrator failures are fatal for the
/// bootstrap only; the caller decides what the process does next.
pub async fn bootstrap(
    cfg: &Config,
    oracle: &dyn TopologyOracle,
    smb: Arc<dyn SmbController>,
) -> SvResult<Option<CoreHandle>> {
    let node = oracle.local_node().await?;
    info!("orchestrator node {} (oracle: {})", node, oracle.name());

    match node.role {
        NodeRole::Worker => {
            info!("worker node: no store member to run");
            Ok(None)
        }
        NodeRole::Leader => {
            info!("leader node: forming new store cluster");
            let cluster = format!("{}={}", node.id, cfg.peer_url(&node.addr));
            let args = store_args(cfg, &node, &cluster, CLUSTER_STATE_NEW);
            start_core(cfg, oracle, smb, &node, args).await.map(Some)
        }
        NodeRole::Manager => {
            let leader_addr = oracle.leader().await?;
            info!("manager node: joining store cluster via leader {}", leader_addr);

            let leader = EtcdBackend::connect(&[cfg.endpoint_for(&leader_addr)]).await?;
            let peer_url = cfg.peer_url(&node.addr);
            let cluster = derive_initial_cluster(&leader, &node, &peer_url).await?;
            let args = store_args(cfg, &node, &cluster, CLUSTER_STATE_EXISTING);
            start_core(cfg, oracle, smb, &node, args).await.map(Some)
        }
    }
}

/// Spawn the local store member, wait for it to answer, wire up the
/// metadata facade and the refcount watcher.
async fn start_core(
    cfg: &Config,
    oracle: &dyn TopologyOracle,
    smb: Arc<dyn SmbController>,
    node: &NodeInfo,
    args: Vec<String>,
) -> SvResult<CoreHandle> {
    let store_child = spawn_store(cfg, &args)?;
    let backend = wait_local_store(cfg, &node.addr).await?;
    let events = backend.watch_prefix(PREFIX_GREF).await?;

    let endpoints: Vec<String> = oracle
        .managers()
        .await?
        .iter()
        .map(|m| cfg.endpoint_for(m))
        .collect();
    let meta = VolumeMeta::new(Arc::new(EtcdConnector::new(endpoints)));

    let shutdown = Arc::new(Notify::new());
    let watcher = RefcountWatcher::new(meta.clone(), smb, events, shutdown.clone());
    let watcher_task = tokio::spawn(watcher.run());

    info!("store member up, refcount watcher running");
    Ok(CoreHandle {
        meta,
        store_child,
        shutdown,
        watcher_task,
    })
}

/// Membership reconciliation decision for a joining manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JoinPlan {
    /// Stale record to remove before adding ourselves.
    pub remove: Option<u64>,
    /// Whether a member-add is needed at all.
    pub add: bool,
}

/// Decide how to reconcile the member list with this node's peer URL.
pub(crate) fn plan_join(members: &[StoreMember], peer_url: &str) -> JoinPlan {
    for member in members {
        if !member.peer_urls.iter().any(|u| u == peer_url) {
            continue;
        }
        if member.name.is_empty() {
            // An unstarted reservation from a previous aborted join;
            // inherit it rather than adding twice.
            return JoinPlan {
                remove: None,
                add: false,
            };
        }
        // The record of our previous life. The data directory behind
        // it is gone, so it must be removed before we can re-join.
        return JoinPlan {
            remove: Some(member.id),
            add: true,
        };
    }
    JoinPlan {
        remove: None,
        add: true,
    }
}

/// Build the `--initial-cluster` string: every started member (the
/// ones with a name), then this node.
pub(crate) fn initial_cluster(members: &[StoreMember], node_id: &str, peer_url: &str) -> String {
    let mut parts: Vec<String> = members
        .iter()
        .filter(|m| !m.name.is_empty())
        .filter_map(|m| m.peer_urls.first().map(|u| format!("{}={}", m.name, u)))
        .collect();
    parts.push(format!("{}={}", node_id, peer_url));
    parts.join(",")
}

/// Reconcile membership through the leader and derive the
/// initial-cluster string for the local member.
pub(crate) async fn derive_initial_cluster(
    leader: &dyn KvBackend,
    node: &NodeInfo,
    peer_url: &str,
) -> SvResult<String> {
    let members = leader.member_list().await?;
    let plan = plan_join(&members, peer_url);

    if let Some(id) = plan.remove {
        info!("removing stale membership record {:#x} for {}", id, peer_url);
        leader.member_remove(id).await?;
    }

    let roster = if plan.add {
        leader.member_add(peer_url).await?
    } else {
        info!("inheriting unstarted membership reservation for {}", peer_url);
        members
    };
    Ok(initial_cluster(&roster, &node.id, peer_url))
}

/// Command-line arguments for the store binary.
fn store_args(
    cfg: &Config,
    node: &NodeInfo,
    initial_cluster: &str,
    cluster_state: &str,
) -> Vec<String> {
    vec![
        "--name".into(),
        node.id.clone(),
        "--advertise-client-urls".into(),
        cfg.client_url(&node.addr),
        "--initial-advertise-peer-urls".into(),
        cfg.peer_url(&node.addr),
        "--listen-client-urls".into(),
        cfg.listen_client_url(),
        "--listen-peer-urls".into(),
        cfg.listen_peer_url(),
        "--initial-cluster-token".into(),
        cfg.cluster_token.clone(),
        "--initial-cluster".into(),
        initial_cluster.to_string(),
        "--initial-cluster-state".into(),
        cluster_state.to_string(),
    ]
}

fn spawn_store(cfg: &Config, args: &[String]) -> SvResult<Child> {
    debug!("spawning {} {:?}", cfg.store_bin, args);
    Command::new(&cfg.store_bin)
        .args(args)
        .spawn()
        .map_err(|e| SvError::StoreSpawn(e.to_string()))
}

/// Poll the local store member until it answers or the bootstrap
/// window closes.
async fn wait_local_store(cfg: &Config, node_addr: &str) -> SvResult<EtcdBackend> {
    let endpoint = cfg.client_url(host_of(node_addr));

    let deadline = tokio::time::sleep(REQUEST_TIMEOUT);
    tokio::pin!(deadline);
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + CHECK_SLEEP, CHECK_SLEEP);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                return Err(SvError::BootstrapTimeout);
            }
            _ = ticker.tick() => {
                debug!("probing local store at {}", endpoint);
                match EtcdBackend::connect(std::slice::from_ref(&endpoint)).await {
                    Ok(backend) => return Ok(backend),
                    Err(e) => warn!("local store not ready yet: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smb::SmbController;
    use crate::store::memory::MemBackend;
    use crate::topology::local::LocalOracle;
    use sharevol_proto::node::NodeRole;

    fn member(id: u64, name: &str, peer_url: &str) -> StoreMember {
        StoreMember {
            id,
            name: name.to_string(),
            peer_urls: vec![peer_url.to_string()],
        }
    }

    fn node(id: &str, addr: &str) -> NodeInfo {
        NodeInfo {
            id: id.into(),
            addr: addr.into(),
            role: NodeRole::Manager,
        }
    }

    struct NoopSmb;

    #[async_trait::async_trait]
    impl SmbController for NoopSmb {
        async fn start(&self, _volume: &str) -> bool {
            true
        }
        async fn stop(&self, _volume: &str) -> bool {
            true
        }
    }

    #[test]
    fn test_plan_join_fresh_node() {
        let members = vec![member(1, "m1", "http://10.0.0.1:2380")];
        let plan = plan_join(&members, "http://10.0.0.2:2380");
        assert_eq!(plan, JoinPlan { remove: None, add: true });
    }

    #[test]
    fn test_plan_join_inherits_reservation() {
        let members = vec![
            member(1, "m1", "http://10.0.0.1:2380"),
            member(2, "", "http://10.0.0.2:2380"),
        ];
        let plan = plan_join(&members, "http://10.0.0.2:2380");
        assert_eq!(plan, JoinPlan { remove: None, add: false });
    }

    #[test]
    fn test_plan_join_removes_stale_identity() {
        // The record of a member that ran here before the data
        // directory was lost.
        let members = vec![
            member(1, "m1", "http://10.0.0.1:2380"),
            member(7, "m2", "http://10.0.0.2:2380"),
        ];
        let plan = plan_join(&members, "http://10.0.0.2:2380");
        assert_eq!(plan, JoinPlan { remove: Some(7), add: true });
    }

    #[test]
    fn test_initial_cluster_skips_unstarted_members() {
        let members = vec![
            member(1, "m1", "http://10.0.0.1:2380"),
            member(2, "", "http://10.0.0.2:2380"),
        ];
        let cluster = initial_cluster(&members, "m3", "http://10.0.0.3:2380");
        assert_eq!(
            cluster,
            "m1=http://10.0.0.1:2380,m3=http://10.0.0.3:2380"
        );
    }

    #[tokio::test]
    async fn test_derive_initial_cluster_rejoin_after_data_loss() {
        let leader = MemBackend::new();
        leader.set_members(vec![
            member(1, "m1", "http://10.0.0.1:2380"),
            member(7, "m2", "http://10.0.0.2:2380"),
        ]);

        let cluster = derive_initial_cluster(
            &leader,
            &node("m2", "10.0.0.2"),
            "http://10.0.0.2:2380",
        )
        .await
        .unwrap();

        // The stale record is gone and a fresh reservation exists.
        let members = leader.member_list().await.unwrap();
        assert!(!members.iter().any(|m| m.id == 7));
        assert!(members
            .iter()
            .any(|m| m.name.is_empty() && m.peer_urls == vec!["http://10.0.0.2:2380"]));
        assert_eq!(
            cluster,
            "m1=http://10.0.0.1:2380,m2=http://10.0.0.2:2380"
        );
    }

    #[tokio::test]
    async fn test_derive_initial_cluster_inherited_reservation() {
        let leader = MemBackend::new();
        leader.set_members(vec![
            member(1, "m1", "http://10.0.0.1:2380"),
            member(2, "", "http://10.0.0.2:2380"),
        ]);

        let cluster = derive_initial_cluster(
            &leader,
            &node("m2", "10.0.0.2"),
            "http://10.0.0.2:2380",
        )
        .await
        .unwrap();

        // No second reservation was added.
        assert_eq!(leader.member_list().await.unwrap().len(), 2);
        assert_eq!(
            cluster,
            "m1=http://10.0.0.1:2380,m2=http://10.0.0.2:2380"
        );
    }

    #[test]
    fn test_store_args_new_cluster() {
        let cfg = Config::default();
        let node = node("m1", "10.0.0.1");
        let args = store_args(&cfg, &node, "m1=http://10.0.0.1:2380", CLUSTER_STATE_NEW);

        let joined = args.join(" ");
        assert!(joined.contains("--name m1"));
        assert!(joined.contains("--advertise-client-urls http://10.0.0.1:2379"));
        assert!(joined.contains("--initial-advertise-peer-urls http://10.0.0.1:2380"));
        assert!(joined.contains("--listen-client-urls http://0.0.0.0:2379"));
        assert!(joined.contains("--listen-peer-urls http://0.0.0.0:2380"));
        assert!(joined.contains("--initial-cluster m1=http://10.0.0.1:2380"));
        assert!(joined.ends_with("--initial-cluster-state new"));
    }

    #[tokio::test]
    async fn test_bootstrap_worker_runs_nothing() {
        let cfg = Config::default();
        let oracle = LocalOracle::new("w1", "10.0.0.9").with_role(NodeRole::Worker);
        let core = bootstrap(&cfg, &oracle, Arc::new(NoopSmb)).await.unwrap();
        assert!(core.is_none());
    }
}
