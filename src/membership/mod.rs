//! Membership changes with leader-only enforcement.
//!
//! The [`MembershipController`] sits between join/leave requests and the
//! consensus group. Every request passes the same stages:
//!
//! ```text
//! Requested ─► LeaderCheck ─► DuplicateCheck ─► Proposed ─► Committed
//!                  │               │                 │
//!                  └───────────────┴─────────────────┴────► Rejected
//! ```
//!
//! The configuration is read fresh for every request; nothing is cached.

mod events;
#[cfg(test)]
pub(crate) mod testing;

pub use events::{BroadcastQueue, ClusterEvent, EventAction, EventPublisher};

use crate::error::{ClusterError, ClusterResult};
use crate::types::{ClusterConfiguration, ClusterServer, NodeMeta, ServerAddress, ServerId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Capability over a running consensus group.
///
/// `is_leader` and `leader` are advisory: the engine re-validates leadership
/// when a change is proposed.
#[async_trait]
pub trait ConsensusGroup: Send + Sync {
    /// Whether this node currently believes it is the leader.
    fn is_leader(&self) -> bool;

    /// The current leader, if known.
    fn leader(&self) -> Option<NodeMeta>;

    /// The latest membership configuration.
    fn current_configuration(&self) -> ClusterResult<ClusterConfiguration>;

    /// Add or re-address a voter.
    ///
    /// `prev_index` of 0 means no precondition; otherwise the configuration
    /// index must still equal it. A zero `timeout` means no local bound.
    async fn add_voter(
        &self,
        id: &ServerId,
        address: &ServerAddress,
        prev_index: u64,
        timeout: Duration,
    ) -> ClusterResult<()>;

    /// Remove a member, voter or not.
    async fn remove_server(
        &self,
        id: &ServerId,
        prev_index: u64,
        timeout: Duration,
    ) -> ClusterResult<()>;

    /// Hand leadership to another voter and wait until it has taken over.
    async fn leadership_transfer(&self) -> ClusterResult<()>;

    /// Seed a brand-new group with `configuration`.
    async fn bootstrap(&self, configuration: ClusterConfiguration) -> ClusterResult<()>;
}

/// Lifecycle phase of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing has happened yet.
    Idle,
    /// Bootstrap is in progress.
    Bootstrapping,
    /// The node is part of a running group.
    Active,
}

/// Runs bootstrap and membership changes.
pub struct MembershipController {
    local: NodeMeta,
    group: Arc<dyn ConsensusGroup>,
    events: Arc<dyn EventPublisher>,
    phase: Mutex<Phase>,
    add_voter_timeout: Duration,
    remove_server_timeout: Duration,
}

impl MembershipController {
    /// Create a controller for the node identified by `local`.
    pub fn new(
        local: NodeMeta,
        group: Arc<dyn ConsensusGroup>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            local,
            group,
            events,
            phase: Mutex::new(Phase::Idle),
            add_voter_timeout: Duration::from_secs(10),
            remove_server_timeout: Duration::from_secs(10),
        }
    }

    /// Override the proposal timeouts (zero means unbounded).
    pub fn with_timeouts(mut self, add_voter: Duration, remove_server: Duration) -> Self {
        self.add_voter_timeout = add_voter;
        self.remove_server_timeout = remove_server;
        self
    }

    /// The local node.
    pub fn local(&self) -> &NodeMeta {
        &self.local
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Record that the node joined, or restarted into, an existing group.
    pub fn mark_active(&self) {
        *self.phase.lock() = Phase::Active;
    }

    /// Whether this node believes it is the leader.
    pub fn is_leader(&self) -> bool {
        self.group.is_leader()
    }

    /// The current leader, if known.
    pub fn leader(&self) -> Option<NodeMeta> {
        self.group.leader()
    }

    /// The latest configuration.
    pub fn configuration(&self) -> ClusterResult<ClusterConfiguration> {
        self.group.current_configuration()
    }

    /// Seed a new group with the local node as its only voter.
    ///
    /// Runs at most once; any later call fails with
    /// [`ClusterError::AlreadyBootstrapped`] and changes nothing.
    pub async fn bootstrap(&self) -> ClusterResult<()> {
        {
            let mut phase = self.phase.lock();
            if *phase != Phase::Idle {
                return Err(ClusterError::AlreadyBootstrapped);
            }
            *phase = Phase::Bootstrapping;
        }

        let configuration = ClusterConfiguration {
            index: 0,
            servers: vec![ClusterServer::voter(
                self.local.server_id.clone(),
                self.local.raft_addr.clone(),
            )],
        };

        match self.group.bootstrap(configuration).await {
            Ok(()) => {
                *self.phase.lock() = Phase::Active;
                tracing::info!(server_id = %self.local.server_id, "cluster bootstrapped");
                Ok(())
            }
            Err(ClusterError::AlreadyBootstrapped) => {
                *self.phase.lock() = Phase::Active;
                Err(ClusterError::AlreadyBootstrapped)
            }
            Err(e) => {
                *self.phase.lock() = Phase::Idle;
                tracing::error!(error = %e, "bootstrap failed");
                Err(e)
            }
        }
    }

    fn ensure_leader(&self, server_id: &ServerId, op: &'static str) -> ClusterResult<()> {
        tracing::debug!(%server_id, op, stage = "leader_check");
        if self.group.is_leader() {
            return Ok(());
        }

        let leader = self.group.leader();
        tracing::debug!(
            %server_id,
            op,
            stage = "rejected",
            leader = ?leader.as_ref().map(|l| l.to_string()),
            "not the leader"
        );
        Err(ClusterError::NotLeader { leader })
    }

    /// Add `node` as a voter.
    ///
    /// If the exact id and address pair is already a voter, the join event is
    /// still published and [`ClusterError::DuplicateMember`] is returned so
    /// callers can treat the request as satisfied.
    pub async fn add_voter(&self, node: &NodeMeta) -> ClusterResult<()> {
        let server_id = &node.server_id;
        tracing::debug!(%server_id, addr = %node.raft_addr, op = "add_voter", stage = "requested");

        self.ensure_leader(server_id, "add_voter")?;

        tracing::debug!(%server_id, op = "add_voter", stage = "duplicate_check");
        let configuration = self
            .group
            .current_configuration()
            .map_err(|e| ClusterError::ConfigurationUnavailable(e.to_string()))?;

        if configuration
            .find_voter(server_id, &node.raft_addr)
            .is_some()
        {
            tracing::info!(
                %server_id,
                addr = %node.raft_addr,
                stage = "rejected",
                "server already a voter"
            );
            self.events.publish(ClusterEvent::joined(node.clone()));
            return Err(ClusterError::DuplicateMember {
                id: server_id.clone(),
                address: node.raft_addr.clone(),
            });
        }

        tracing::debug!(%server_id, op = "add_voter", stage = "proposed");
        if let Err(e) = self
            .group
            .add_voter(server_id, &node.raft_addr, 0, self.add_voter_timeout)
            .await
        {
            tracing::warn!(%server_id, error = %e, stage = "rejected", "add voter failed");
            return Err(e);
        }

        tracing::info!(%server_id, addr = %node.raft_addr, stage = "committed", "voter added");
        self.events.publish(ClusterEvent::joined(node.clone()));
        Ok(())
    }

    /// Remove `node` from the configuration.
    pub async fn remove_server(&self, node: &NodeMeta) -> ClusterResult<()> {
        let server_id = &node.server_id;
        tracing::debug!(%server_id, op = "remove_server", stage = "requested");

        self.ensure_leader(server_id, "remove_server")?;

        tracing::debug!(%server_id, op = "remove_server", stage = "proposed");
        if let Err(e) = self
            .group
            .remove_server(server_id, 0, self.remove_server_timeout)
            .await
        {
            tracing::warn!(%server_id, error = %e, stage = "rejected", "remove server failed");
            return Err(e);
        }

        tracing::info!(%server_id, stage = "committed", "server removed");
        self.events.publish(ClusterEvent::left(node.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeGroup;
    use super::*;

    fn controller(group: &Arc<FakeGroup>) -> (MembershipController, Arc<BroadcastQueue>) {
        let events = Arc::new(BroadcastQueue::new(16));
        let controller = MembershipController::new(
            NodeMeta::new("n1", "10.0.0.1:8300"),
            group.clone(),
            events.clone(),
        );
        (controller, events)
    }

    #[tokio::test]
    async fn test_bootstrap_runs_once() {
        let group = Arc::new(FakeGroup::new());
        let (controller, _) = controller(&group);
        assert_eq!(controller.phase(), Phase::Idle);

        controller.bootstrap().await.expect("bootstrap");
        assert_eq!(controller.phase(), Phase::Active);
        let config = group.current_configuration().expect("config");
        assert_eq!(config.voters().count(), 1);

        let err = controller.bootstrap().await.expect_err("second bootstrap");
        assert!(matches!(err, ClusterError::AlreadyBootstrapped));
        assert_eq!(group.current_configuration().expect("config"), config);
        assert_eq!(group.bootstrap_calls(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_over_existing_state() {
        let group = Arc::new(FakeGroup::new().with_voters(&[("n1", "10.0.0.1:8300")]));
        let (controller, _) = controller(&group);

        let err = controller.bootstrap().await.expect_err("already bootstrapped");
        assert!(matches!(err, ClusterError::AlreadyBootstrapped));
        assert_eq!(controller.phase(), Phase::Active);
    }

    #[tokio::test]
    async fn test_add_voter_is_idempotent_per_pair() {
        let group = Arc::new(FakeGroup::new().with_voters(&[("n1", "10.0.0.1:8300")]));
        let (controller, events) = controller(&group);
        let n2 = NodeMeta::new("n2", "10.0.0.2:8300");

        controller.add_voter(&n2).await.expect("first add");
        let err = controller.add_voter(&n2).await.expect_err("repeat add");
        assert!(matches!(err, ClusterError::DuplicateMember { .. }));

        // One mutation, one event per call.
        assert_eq!(group.add_voter_calls(), 1);
        let published = events.drain();
        assert_eq!(published.len(), 2);
        assert!(
            published
                .iter()
                .all(|e| e.action == EventAction::RaftJoinSuccess && e.node == n2)
        );
    }

    #[tokio::test]
    async fn test_same_id_new_address_is_rejoin() {
        let group = Arc::new(
            FakeGroup::new().with_voters(&[("n1", "10.0.0.1:8300"), ("n2", "10.0.0.2:8300")]),
        );
        let (controller, events) = controller(&group);

        let moved = NodeMeta::new("n2", "10.0.0.9:8300");
        controller.add_voter(&moved).await.expect("re-join");

        assert_eq!(group.add_voter_calls(), 1);
        let config = group.current_configuration().expect("config");
        assert!(config.find_voter(&moved.server_id, &moved.raft_addr).is_some());
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_non_leader_rejects_without_event() {
        let group = Arc::new(FakeGroup::new().with_voters(&[("n1", "10.0.0.1:8300")]));
        group.set_leader(false);
        group.set_leader_hint(Some(NodeMeta::new("n3", "10.0.0.3:8300")));
        let (controller, events) = controller(&group);
        let before = group.current_configuration().expect("config");

        let n2 = NodeMeta::new("n2", "10.0.0.2:8300");
        match controller.add_voter(&n2).await {
            Err(ClusterError::NotLeader { leader: Some(leader) }) => {
                assert_eq!(leader.server_id.as_str(), "n3");
            }
            other => panic!("expected NotLeader with hint, got {:?}", other),
        }
        assert!(matches!(
            controller.remove_server(&n2).await,
            Err(ClusterError::NotLeader { .. })
        ));

        assert!(events.is_empty());
        assert_eq!(group.add_voter_calls(), 0);
        assert_eq!(group.current_configuration().expect("config"), before);
    }

    #[tokio::test]
    async fn test_configuration_failure_is_reported() {
        let group = Arc::new(FakeGroup::new());
        group.set_leader(true);
        let (controller, events) = controller(&group);

        let err = controller
            .add_voter(&NodeMeta::new("n2", "10.0.0.2:8300"))
            .await
            .expect_err("no configuration");
        assert!(matches!(err, ClusterError::ConfigurationUnavailable(_)));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_engine_error_publishes_nothing() {
        let group = Arc::new(FakeGroup::new().with_voters(&[("n1", "10.0.0.1:8300")]));
        group.fail_next(ClusterError::Timeout(Duration::from_millis(5)));
        let (controller, events) = controller(&group);

        let err = controller
            .add_voter(&NodeMeta::new("n2", "10.0.0.2:8300"))
            .await
            .expect_err("engine failure");
        assert!(matches!(err, ClusterError::Timeout(_)));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_remove_publishes_leave() {
        let group = Arc::new(
            FakeGroup::new().with_voters(&[("n1", "10.0.0.1:8300"), ("n2", "10.0.0.2:8300")]),
        );
        let (controller, events) = controller(&group);

        let n2 = NodeMeta::new("n2", "10.0.0.2:8300");
        controller.remove_server(&n2).await.expect("remove");

        let config = group.current_configuration().expect("config");
        assert!(config.get(&n2.server_id).is_none());
        assert_eq!(events.drain(), vec![ClusterEvent::left(n2)]);
    }
}
