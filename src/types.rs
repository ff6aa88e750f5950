//! Type definitions for OpenRaft integration and cluster membership.
//!
//! OpenRaft requires a type configuration that specifies all the concrete types
//! used in the Raft implementation. Members are identified by an opaque string
//! [`ServerId`]; the engine itself works with a `u64` derived from it.

use crate::command::{Command, CommandResponse};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Cursor;

/// Engine-level node ID type.
pub type ClusterNodeId = u64;

openraft::declare_raft_types!(
    /// OpenRaft type configuration for raftkeeper.
    pub TypeConfig:
        D = Command,
        R = CommandResponse,
        NodeId = ClusterNodeId,
        Node = NodeMeta,
);

/// Type alias for Raft instance.
pub type ClusterRaft = openraft::Raft<TypeConfig>;

/// Type alias for log entry.
pub type ClusterEntry = openraft::Entry<TypeConfig>;

/// Type alias for vote.
pub type ClusterVote = openraft::Vote<ClusterNodeId>;

/// Type alias for log ID.
pub type ClusterLogId = openraft::LogId<ClusterNodeId>;

/// Type alias for membership.
pub type ClusterMembership = openraft::Membership<ClusterNodeId, NodeMeta>;

/// Type alias for stored membership.
pub type ClusterStoredMembership = openraft::StoredMembership<ClusterNodeId, NodeMeta>;

/// Type alias for snapshot metadata.
pub type ClusterSnapshotMeta = openraft::SnapshotMeta<ClusterNodeId, NodeMeta>;

/// Type alias for snapshot.
pub type ClusterSnapshot = openraft::storage::Snapshot<TypeConfig>;

/// Type alias for storage error.
pub type ClusterStorageError = openraft::StorageError<ClusterNodeId>;

/// Type alias for engine metrics.
pub type ClusterMetrics = openraft::RaftMetrics<ClusterNodeId, NodeMeta>;

/// Opaque, globally unique identifier of a cluster member.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Create a server id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The engine node id for this server.
    ///
    /// Derived from the SHA-256 digest of the id so that every member computes
    /// the same value without coordination.
    pub fn node_id(&self) -> ClusterNodeId {
        let digest = Sha256::digest(self.0.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// `host:port` where a member's Raft transport listens.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerAddress(String);

impl ServerAddress {
    /// Create a server address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServerAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Externally visible identity of a member.
///
/// This is also the node record stored by the engine in every membership
/// entry, so the configuration always carries the real server id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Server id.
    #[serde(rename = "ServerID")]
    pub server_id: ServerId,
    /// Raft transport address.
    #[serde(rename = "RaftAddr")]
    pub raft_addr: ServerAddress,
}

impl NodeMeta {
    /// Create node metadata.
    pub fn new(server_id: impl Into<ServerId>, raft_addr: impl Into<ServerAddress>) -> Self {
        Self {
            server_id: server_id.into(),
            raft_addr: raft_addr.into(),
        }
    }

    /// The engine node id for this member.
    pub fn node_id(&self) -> ClusterNodeId {
        self.server_id.node_id()
    }
}

impl fmt::Display for NodeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.server_id, self.raft_addr)
    }
}

/// Whether a member votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Suffrage {
    /// Counts toward quorum and elections.
    Voter,
    /// Receives the log but does not vote (an openraft learner).
    Nonvoter,
}

/// One member of a [`ClusterConfiguration`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterServer {
    /// Server id.
    pub id: ServerId,
    /// Raft transport address.
    pub address: ServerAddress,
    /// Voting status.
    pub suffrage: Suffrage,
}

impl ClusterServer {
    /// A voting member.
    pub fn voter(id: impl Into<ServerId>, address: impl Into<ServerAddress>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            suffrage: Suffrage::Voter,
        }
    }
}

/// A version of the cluster membership as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfiguration {
    /// Log index of the membership entry that produced this configuration.
    pub index: u64,
    /// Members, in engine order.
    pub servers: Vec<ClusterServer>,
}

impl ClusterConfiguration {
    /// Build a configuration from the engine's stored membership.
    pub fn from_membership(stored: &ClusterStoredMembership) -> Self {
        let membership = stored.membership();
        let voters: std::collections::BTreeSet<ClusterNodeId> = membership.voter_ids().collect();

        let servers = membership
            .nodes()
            .map(|(node_id, node)| ClusterServer {
                id: node.server_id.clone(),
                address: node.raft_addr.clone(),
                suffrage: if voters.contains(node_id) {
                    Suffrage::Voter
                } else {
                    Suffrage::Nonvoter
                },
            })
            .collect();

        Self {
            index: stored
                .log_id()
                .as_ref()
                .map(|log_id| log_id.index)
                .unwrap_or(0),
            servers,
        }
    }

    /// Iterate over voting members.
    pub fn voters(&self) -> impl Iterator<Item = &ClusterServer> {
        self.servers
            .iter()
            .filter(|s| s.suffrage == Suffrage::Voter)
    }

    /// Find a voter matching both id and address.
    pub fn find_voter(&self, id: &ServerId, address: &ServerAddress) -> Option<&ClusterServer> {
        self.voters()
            .find(|s| &s.id == id && &s.address == address)
    }

    /// Find any member by id.
    pub fn get(&self, id: &ServerId) -> Option<&ClusterServer> {
        self.servers.iter().find(|s| &s.id == id)
    }
}
