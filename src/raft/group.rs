//! The running consensus group.

use super::log_storage::LogStorage;
use super::state_machine::StateMachineStore;
use crate::command::{Command, CommandResponse};
use crate::config::NodeConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::membership::ConsensusGroup;
use crate::network::{NetworkFactory, TimeoutNowRequest};
use crate::state::StateMachine;
use crate::store::Stores;
use crate::types::{
    ClusterConfiguration, ClusterMetrics, ClusterNodeId, ClusterRaft, NodeMeta, ServerAddress,
    ServerId, Suffrage,
};
use async_trait::async_trait;
use openraft::{ChangeMembers, Config, Raft};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Run `fut`, bounded by `timeout` unless it is zero.
async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = ClusterResult<T>>,
) -> ClusterResult<T> {
    if timeout.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ClusterError::Timeout(timeout))?
}

fn check_prev_index(config: &ClusterConfiguration, prev_index: u64) -> ClusterResult<()> {
    if prev_index != 0 && prev_index != config.index {
        return Err(ClusterError::StaleConfiguration {
            expected: prev_index,
            current: config.index,
        });
    }
    Ok(())
}

/// Handle to the openraft instance of this node.
///
/// Members are addressed by [`ServerId`]; the engine id is derived from it
/// (see [`ServerId::node_id`]).
pub struct RaftGroup {
    local: NodeMeta,
    node_id: ClusterNodeId,
    raft: ClusterRaft,
    network: NetworkFactory,
    state_machine: Arc<StateMachineStore>,
    transfer_timeout: Duration,
}

impl RaftGroup {
    /// Build the engine over `stores` and `machine`.
    pub async fn start(
        config: &NodeConfig,
        local: NodeMeta,
        stores: Stores,
        machine: Box<dyn StateMachine>,
        network: NetworkFactory,
    ) -> ClusterResult<Self> {
        let node_id = local.node_id();

        let raft_config = Config {
            cluster_name: "raftkeeper".to_string(),
            election_timeout_min: config.raft.election_timeout_ms.0,
            election_timeout_max: config.raft.election_timeout_ms.1,
            heartbeat_interval: config.raft.heartbeat_interval_ms,
            max_payload_entries: config.raft.max_entries_per_append,
            snapshot_policy: openraft::SnapshotPolicy::LogsSinceLast(
                config.snapshot.snapshot_threshold,
            ),
            ..Default::default()
        };
        let raft_config = Arc::new(
            raft_config
                .validate()
                .map_err(|e| ClusterError::Config(e.to_string()))?,
        );

        let log_storage = LogStorage::new(stores.log, stores.stable);
        let state_machine = Arc::new(
            StateMachineStore::new(machine, stores.snapshots)
                .map_err(|e| ClusterError::Storage(format!("failed to restore snapshot: {}", e)))?,
        );

        let raft = Raft::new(
            node_id,
            raft_config,
            network.clone(),
            log_storage,
            state_machine.clone(),
        )
        .await
        .map_err(|e| ClusterError::Storage(format!("failed to create raft: {}", e)))?;

        tracing::info!(server_id = %local.server_id, node_id, "raft group started");

        Ok(Self {
            local,
            node_id,
            raft,
            network,
            state_machine,
            transfer_timeout: config.transfer_timeout(),
        })
    }

    /// This node's identity.
    pub fn local(&self) -> &NodeMeta {
        &self.local
    }

    /// The engine handle, for serving RPCs.
    pub fn raft(&self) -> &ClusterRaft {
        &self.raft
    }

    /// A snapshot of the engine metrics.
    pub fn metrics(&self) -> ClusterMetrics {
        self.raft.metrics().borrow().clone()
    }

    /// Log index of the last entry applied locally.
    pub async fn last_applied_index(&self) -> u64 {
        self.state_machine
            .last_applied()
            .await
            .map(|log_id| log_id.index)
            .unwrap_or(0)
    }

    /// Propose an application command and wait for its result.
    pub async fn apply(&self, command: Command, timeout: Duration) -> ClusterResult<CommandResponse> {
        bounded(timeout, async {
            let response = self.raft.client_write(command).await?;
            Ok::<_, ClusterError>(response.data)
        })
        .await
    }

    /// Wait until some node, possibly this one, is known as leader.
    pub async fn wait_for_leader(&self, timeout: Duration) -> ClusterResult<NodeMeta> {
        self.raft
            .wait(Some(timeout))
            .metrics(|m| m.current_leader.is_some(), "leader known")
            .await
            .map_err(|_| ClusterError::Timeout(timeout))?;
        self.leader().ok_or(ClusterError::NotLeader { leader: None })
    }

    /// Stop the engine.
    pub async fn shutdown(&self) -> ClusterResult<()> {
        self.raft
            .shutdown()
            .await
            .map_err(|e| ClusterError::Raft(format!("shutdown failed: {}", e)))?;
        tracing::info!(server_id = %self.local.server_id, "raft group stopped");
        Ok(())
    }

    fn node_of(&self, node_id: ClusterNodeId) -> Option<NodeMeta> {
        self.raft
            .metrics()
            .borrow()
            .membership_config
            .membership()
            .get_node(&node_id)
            .cloned()
    }

    fn set_leader_duties(&self, enabled: bool) {
        let runtime = self.raft.runtime_config();
        runtime.heartbeat(enabled);
        runtime.elect(enabled);
    }

    /// The other voter with the highest matched log index.
    fn transfer_target(&self, metrics: &ClusterMetrics) -> Option<(ClusterNodeId, NodeMeta)> {
        let membership = metrics.membership_config.membership();
        let matched = metrics.replication.as_ref();

        membership
            .voter_ids()
            .filter(|id| *id != self.node_id)
            .filter_map(|id| {
                let index = matched
                    .and_then(|r| r.get(&id))
                    .and_then(|log_id| log_id.as_ref())
                    .map(|log_id| log_id.index);
                membership.get_node(&id).map(|node| (id, node.clone(), index))
            })
            .max_by_key(|(_, _, index)| *index)
            .map(|(id, node, _)| (id, node))
    }

    async fn hand_off(&self, target: &NodeMeta, term: u64) -> ClusterResult<()> {
        let response = self
            .network
            .timeout_now(
                target,
                &TimeoutNowRequest {
                    leader: self.local.clone(),
                    term,
                },
            )
            .await?;
        if !response.accepted {
            return Err(ClusterError::LeadershipTransfer(format!(
                "{} refused to campaign",
                target
            )));
        }

        let me = self.node_id;
        self.raft
            .wait(Some(self.transfer_timeout))
            .metrics(
                |m| matches!(m.current_leader, Some(leader) if leader != me),
                "leadership transferred",
            )
            .await
            .map_err(|e| ClusterError::LeadershipTransfer(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ConsensusGroup for RaftGroup {
    fn is_leader(&self) -> bool {
        self.raft.metrics().borrow().current_leader == Some(self.node_id)
    }

    fn leader(&self) -> Option<NodeMeta> {
        let leader_id = self.raft.metrics().borrow().current_leader?;
        self.node_of(leader_id)
    }

    fn current_configuration(&self) -> ClusterResult<ClusterConfiguration> {
        let metrics = self.raft.metrics().borrow().clone();
        if metrics.membership_config.membership().voter_ids().next().is_none() {
            return Err(ClusterError::NotInitialized);
        }
        Ok(ClusterConfiguration::from_membership(
            &metrics.membership_config,
        ))
    }

    async fn add_voter(
        &self,
        id: &ServerId,
        address: &ServerAddress,
        prev_index: u64,
        timeout: Duration,
    ) -> ClusterResult<()> {
        let node_id = id.node_id();
        let config = self.current_configuration()?;
        check_prev_index(&config, prev_index)?;

        let existing = self.node_of(node_id);
        if let Some(existing) = &existing {
            if &existing.server_id != id {
                return Err(ClusterError::ServerIdConflict {
                    id: id.clone(),
                    existing: existing.server_id.clone(),
                });
            }
        }

        let node = NodeMeta::new(id.clone(), address.clone());
        bounded(timeout, async {
            match existing {
                Some(existing) if &existing.raft_addr != address => {
                    tracing::info!(server_id = %id, from = %existing.raft_addr, to = %address, "updating member address");
                    self.raft
                        .change_membership(
                            ChangeMembers::SetNodes(BTreeMap::from([(node_id, node.clone())])),
                            false,
                        )
                        .await?;
                }
                _ => {
                    tracing::debug!(server_id = %id, "adding learner and waiting for catch-up");
                    self.raft.add_learner(node_id, node.clone(), true).await?;
                }
            }

            self.raft
                .change_membership(ChangeMembers::AddVoterIds(BTreeSet::from([node_id])), false)
                .await?;
            Ok::<(), ClusterError>(())
        })
        .await
    }

    async fn remove_server(
        &self,
        id: &ServerId,
        prev_index: u64,
        timeout: Duration,
    ) -> ClusterResult<()> {
        let node_id = id.node_id();
        let config = self.current_configuration()?;
        check_prev_index(&config, prev_index)?;

        let Some(server) = config.get(id) else {
            tracing::debug!(server_id = %id, "server not in configuration");
            return Ok(());
        };

        let change = match server.suffrage {
            Suffrage::Voter => ChangeMembers::RemoveVoters(BTreeSet::from([node_id])),
            Suffrage::Nonvoter => ChangeMembers::RemoveNodes(BTreeSet::from([node_id])),
        };

        bounded(timeout, async {
            self.raft.change_membership(change, false).await?;
            Ok::<(), ClusterError>(())
        })
        .await
    }

    async fn leadership_transfer(&self) -> ClusterResult<()> {
        let metrics = self.metrics();
        if metrics.current_leader != Some(self.node_id) {
            return Err(ClusterError::NotLeader {
                leader: self.leader(),
            });
        }

        let (target_id, target) = self
            .transfer_target(&metrics)
            .ok_or(ClusterError::NoTransferTarget)?;

        tracing::info!(target = %target, target_id, "transferring leadership");

        // Stop asserting leadership so the target's election can win.
        self.set_leader_duties(false);
        let result = bounded(
            self.transfer_timeout,
            self.hand_off(&target, metrics.current_term),
        )
        .await;
        self.set_leader_duties(true);

        match result {
            Ok(()) => {
                tracing::info!(leader = ?self.leader().map(|l| l.to_string()), "leadership transferred");
                Ok(())
            }
            Err(ClusterError::Timeout(elapsed)) => Err(ClusterError::LeadershipTransfer(format!(
                "{} did not take over within {:?}",
                target, elapsed
            ))),
            Err(e) => Err(ClusterError::LeadershipTransfer(e.to_string())),
        }
    }

    async fn bootstrap(&self, configuration: ClusterConfiguration) -> ClusterResult<()> {
        let mut members: BTreeMap<ClusterNodeId, NodeMeta> = BTreeMap::new();
        for server in configuration.voters() {
            let node = NodeMeta::new(server.id.clone(), server.address.clone());
            if let Some(previous) = members.insert(node.node_id(), node) {
                if previous.server_id != server.id {
                    return Err(ClusterError::ServerIdConflict {
                        id: server.id.clone(),
                        existing: previous.server_id,
                    });
                }
            }
        }

        if members.is_empty() {
            return Err(ClusterError::Config(
                "bootstrap configuration names no voter".to_string(),
            ));
        }

        self.raft.initialize(members).await?;
        Ok(())
    }
}
