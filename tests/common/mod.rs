//! Common test utilities for raftkeeper tests.

use raftkeeper::config::NodeConfigBuilder;
use raftkeeper::proto::Payload;
use raftkeeper::proto::cluster_service_client::ClusterServiceClient;
use raftkeeper::{ClusterNode, KvStateMachine, MembershipReply, NodeConfig, NodeMeta};
use std::time::{Duration, Instant};

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config for an in-memory node on an OS-assigned localhost port.
pub fn node_config(server_id: &str) -> NodeConfigBuilder {
    NodeConfig::builder()
        .server_id(server_id)
        .bind_addr("127.0.0.1")
        .raft_bind_port(0)
        .in_memory(true)
        .election_timeout_ms(300, 600)
        .heartbeat_interval_ms(50)
}

/// Start a node with a fresh key/value state machine.
pub async fn start_node(config: NodeConfig) -> (ClusterNode, KvStateMachine) {
    init_tracing();
    let kv = KvStateMachine::new();
    let node = ClusterNode::start(config, Box::new(kv.clone()))
        .await
        .expect("Failed to start node");
    (node, kv)
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

/// Send a join request for `node` to the member at `addr`.
#[allow(dead_code)]
pub async fn send_join(addr: &str, node: &NodeMeta) -> MembershipReply {
    let mut client = ClusterServiceClient::connect(format!("http://{}", addr))
        .await
        .expect("Failed to connect");
    client
        .join(Payload::json(node).expect("encode"))
        .await
        .expect("join rpc")
        .into_inner()
        .decode_json()
        .expect("decode reply")
}

/// Nodes started one after another; the first bootstraps and the rest join
/// through it.
#[allow(dead_code)]
pub struct TestCluster {
    /// Cluster nodes, `n1` first.
    pub nodes: Vec<ClusterNode>,
    /// Each node's local state machine replica.
    pub kvs: Vec<KvStateMachine>,
}

#[allow(dead_code)]
impl TestCluster {
    /// Start `node_count` nodes named `n1`, `n2`, ...
    pub async fn new(node_count: usize) -> Self {
        let mut nodes = Vec::with_capacity(node_count);
        let mut kvs = Vec::with_capacity(node_count);

        let config = node_config("n1").build().expect("Invalid config");
        let (first, kv) = start_node(config).await;
        first
            .group()
            .wait_for_leader(Duration::from_secs(5))
            .await
            .expect("bootstrap node should elect itself");
        let seed = first.local().raft_addr.to_string();
        nodes.push(first);
        kvs.push(kv);

        for i in 2..=node_count {
            let config = node_config(&format!("n{}", i))
                .join_addr(seed.clone())
                .build()
                .expect("Invalid config");
            let (node, kv) = start_node(config).await;
            nodes.push(node);
            kvs.push(kv);
        }

        let cluster = Self { nodes, kvs };
        assert!(
            cluster
                .wait_for_voters(node_count, Duration::from_secs(5))
                .await,
            "all nodes should see {} voters",
            node_count
        );
        cluster
    }

    /// Wait until every node reports `count` voters.
    pub async fn wait_for_voters(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || {
            self.nodes.iter().all(|node| {
                node.configuration()
                    .map(|c| c.voters().count() == count)
                    .unwrap_or(false)
            })
        })
        .await
    }

    /// Index of the node that currently believes it leads.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<usize> {
        let mut leader = None;
        wait_until(timeout, || {
            leader = self.nodes.iter().position(|node| node.is_leader());
            leader.is_some()
        })
        .await;
        leader
    }

    /// Gracefully stop the leader, then drop the remaining nodes.
    pub async fn shutdown(&mut self) {
        if let Some(i) = self.nodes.iter().position(|node| node.is_leader()) {
            let mut leader = self.nodes.remove(i);
            if let Err(e) = leader.shutdown().await {
                tracing::warn!(server_id = %leader.local().server_id, error = %e, "shutdown failed");
            }
        }
        self.nodes.clear();
    }
}
