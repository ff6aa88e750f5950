//! Membership service for joining nodes and operators.
//!
//! This module provides the ClusterService gRPC implementation that a
//! starting node calls to join through an existing member, and that
//! operators use to remove members and inspect the configuration.

mod cluster;

pub use cluster::ClusterServiceImpl;

use crate::error::ClusterError;
use crate::types::{ClusterConfiguration, NodeMeta};
use serde::{Deserialize, Serialize};

/// Outcome of a join or leave request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MembershipReply {
    /// The change committed.
    Accepted,
    /// The node was already a voter with the same address.
    AlreadyMember,
    /// The contacted member is not the leader; retry against `leader`.
    NotLeader {
        /// The leader, if the member knows it.
        leader: Option<NodeMeta>,
    },
    /// The change was rejected or did not complete.
    Failed {
        /// Error text reported by the leader.
        error: String,
        /// Whether the change may still commit.
        indeterminate: bool,
    },
}

impl MembershipReply {
    /// Whether the requested membership now holds.
    pub fn is_success(&self) -> bool {
        matches!(self, MembershipReply::Accepted | MembershipReply::AlreadyMember)
    }
}

impl From<Result<(), ClusterError>> for MembershipReply {
    fn from(result: Result<(), ClusterError>) -> Self {
        match result {
            Ok(()) => MembershipReply::Accepted,
            Err(ClusterError::DuplicateMember { .. }) => MembershipReply::AlreadyMember,
            Err(ClusterError::NotLeader { leader }) => MembershipReply::NotLeader { leader },
            Err(e) => MembershipReply::Failed {
                indeterminate: e.is_indeterminate(),
                error: e.to_string(),
            },
        }
    }
}

/// A member's view of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    /// The member answering.
    pub node: NodeMeta,
    /// Whether it believes it is the leader.
    pub is_leader: bool,
    /// The leader it knows of.
    pub leader: Option<NodeMeta>,
    /// Its latest configuration, absent before bootstrap or join.
    pub configuration: Option<ClusterConfiguration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ServerAddress, ServerId};
    use std::time::Duration;

    #[test]
    fn test_reply_from_result() {
        assert_eq!(MembershipReply::from(Ok(())), MembershipReply::Accepted);

        let dup = Err(ClusterError::DuplicateMember {
            id: ServerId::from("n2"),
            address: ServerAddress::from("10.0.0.2:8300"),
        });
        let reply = MembershipReply::from(dup);
        assert_eq!(reply, MembershipReply::AlreadyMember);
        assert!(reply.is_success());

        let reply = MembershipReply::from(Err(ClusterError::Timeout(Duration::from_secs(1))));
        match reply {
            MembershipReply::Failed {
                indeterminate,
                error,
            } => {
                assert!(indeterminate);
                assert!(error.contains("timed out"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_reply_wire_format() {
        let reply = MembershipReply::NotLeader {
            leader: Some(NodeMeta::new("n1", "10.0.0.1:8300")),
        };
        let json = serde_json::to_string(&reply).expect("serialize");
        assert_eq!(
            json,
            r#"{"outcome":"not_leader","leader":{"ServerID":"n1","RaftAddr":"10.0.0.1:8300"}}"#
        );
    }
}
