//! Leadership hand-off before the node stops.

use crate::error::ClusterResult;
use crate::membership::ConsensusGroup;
use std::sync::Arc;

/// What the coordinator did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The node was not leader; nothing to hand off.
    NotLeader,
    /// The node leads a single-voter group; no one is left to elect.
    SoleVoter,
    /// Leadership was handed to another voter.
    Transferred,
}

/// Transfers leadership away from this node before it exits.
///
/// A failed transfer is returned to the caller, who should not proceed with
/// stopping the engine: the group would otherwise sit leaderless for an
/// election timeout.
pub struct ShutdownCoordinator {
    group: Arc<dyn ConsensusGroup>,
}

impl ShutdownCoordinator {
    /// Create a coordinator for `group`.
    pub fn new(group: Arc<dyn ConsensusGroup>) -> Self {
        Self { group }
    }

    /// Hand off leadership if this node holds it.
    pub async fn run(&self) -> ClusterResult<ShutdownOutcome> {
        if !self.group.is_leader() {
            tracing::debug!("not the leader, nothing to transfer");
            return Ok(ShutdownOutcome::NotLeader);
        }

        let voters = match self.group.current_configuration() {
            Ok(config) => config.voters().count(),
            Err(e) => {
                tracing::warn!(error = %e, "could not read configuration, attempting transfer");
                0
            }
        };
        if voters == 1 {
            tracing::info!("sole voter, no leadership to hand off");
            return Ok(ShutdownOutcome::SoleVoter);
        }

        tracing::info!(voters, "transferring leadership before shutdown");
        if let Err(e) = self.group.leadership_transfer().await {
            tracing::error!(error = %e, "leadership transfer failed, halting shutdown");
            return Err(e);
        }

        tracing::info!(leader = ?self.group.leader().map(|l| l.to_string()), "leadership transferred");
        Ok(ShutdownOutcome::Transferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;
    use crate::membership::testing::FakeGroup;

    #[tokio::test]
    async fn test_follower_returns_immediately() {
        let group = Arc::new(FakeGroup::new().with_voters(&[("n1", "a:1"), ("n2", "b:1")]));
        group.set_leader(false);

        let outcome = ShutdownCoordinator::new(group.clone())
            .run()
            .await
            .expect("shutdown");
        assert_eq!(outcome, ShutdownOutcome::NotLeader);
        assert_eq!(group.transfer_calls(), 0);
    }

    #[tokio::test]
    async fn test_leader_transfers() {
        let group = Arc::new(FakeGroup::new().with_voters(&[("n1", "a:1"), ("n2", "b:1")]));

        let outcome = ShutdownCoordinator::new(group.clone())
            .run()
            .await
            .expect("shutdown");
        assert_eq!(outcome, ShutdownOutcome::Transferred);
        assert!(!group.is_leader());
        assert_eq!(
            group.leader().map(|l| l.server_id.to_string()),
            Some("n2".to_string())
        );
    }

    #[tokio::test]
    async fn test_sole_voter_skips_transfer() {
        let group = Arc::new(FakeGroup::new().with_voters(&[("n1", "a:1")]));

        let outcome = ShutdownCoordinator::new(group.clone())
            .run()
            .await
            .expect("shutdown");
        assert_eq!(outcome, ShutdownOutcome::SoleVoter);
        assert_eq!(group.transfer_calls(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_configuration_still_attempts_transfer() {
        let group = Arc::new(FakeGroup::new());

        let err = ShutdownCoordinator::new(group.clone())
            .run()
            .await
            .expect_err("no configuration to transfer within");
        assert!(matches!(err, ClusterError::NotInitialized));
        assert_eq!(group.transfer_calls(), 1);
        assert!(group.is_leader());
    }

    #[tokio::test]
    async fn test_missing_target_is_reported() {
        let group = Arc::new(FakeGroup::new().with_voters(&[("n1", "a:1"), ("n2", "b:1")]));
        group.fail_next_transfer(ClusterError::NoTransferTarget);

        let err = ShutdownCoordinator::new(group.clone())
            .run()
            .await
            .expect_err("no target");
        assert!(matches!(err, ClusterError::NoTransferTarget));
        assert!(group.is_leader());
    }

    #[tokio::test]
    async fn test_transfer_failure_is_reported() {
        let group = Arc::new(FakeGroup::new().with_voters(&[("n1", "a:1"), ("n2", "b:1")]));
        group.fail_transfers();

        let err = ShutdownCoordinator::new(group.clone())
            .run()
            .await
            .expect_err("transfer fails");
        assert!(matches!(err, ClusterError::LeadershipTransfer(_)));
        assert!(group.is_leader());
    }
}
