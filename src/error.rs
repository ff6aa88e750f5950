//! Error types for cluster operations.

use crate::types::{NodeMeta, ServerAddress, ServerId};
use std::time::Duration;
use thiserror::Error;

/// Result type for cluster operations.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Type alias for OpenRaft Raft errors.
pub type RaftError<E = openraft::error::Infallible> = openraft::error::RaftError<u64, E>;

/// Type alias for OpenRaft RPC errors.
pub type RPCError<E = openraft::error::Infallible> =
    openraft::error::RPCError<u64, NodeMeta, RaftError<E>>;

/// Type alias for client write errors.
pub type ClientWriteError = openraft::error::ClientWriteError<u64, NodeMeta>;

/// Type alias for initialize errors.
pub type InitializeError = openraft::error::InitializeError<u64, NodeMeta>;

/// Errors that can occur in cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend could not be opened or used.
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The bind or advertise address could not be resolved.
    #[error("Could not resolve address {addr}: {reason}")]
    AddressResolution {
        /// The address as configured.
        addr: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Network/RPC error.
    #[error("Network error: {0}")]
    Network(#[from] tonic::Status),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Not the leader - includes leader hint if known.
    #[error("Not the leader, leader is {leader:?}")]
    NotLeader {
        /// The current leader if known.
        leader: Option<NodeMeta>,
    },

    /// The engine could not produce a membership configuration.
    #[error("Could not retrieve raft configuration: {0}")]
    ConfigurationUnavailable(String),

    /// Cluster not initialized.
    #[error("Cluster not initialized")]
    NotInitialized,

    /// The exact (id, address) pair is already a voter.
    #[error("Server with id {id} and address {address} already exists")]
    DuplicateMember {
        /// Server id of the existing voter.
        id: ServerId,
        /// Address of the existing voter.
        address: ServerAddress,
    },

    /// A membership change was conditioned on a configuration index that is no longer current.
    #[error("Configuration changed: expected index {expected}, current index is {current}")]
    StaleConfiguration {
        /// Index the caller expected.
        expected: u64,
        /// Index the engine reports.
        current: u64,
    },

    /// Two different server ids map onto the same engine node id.
    #[error("Server id {id} conflicts with existing member {existing}")]
    ServerIdConflict {
        /// The id being added.
        id: ServerId,
        /// The member already holding the engine node id.
        existing: ServerId,
    },

    /// The log or vote already holds state, bootstrap is not allowed.
    #[error("Cluster already bootstrapped")]
    AlreadyBootstrapped,

    /// The engine rejected a membership change.
    #[error("Membership change rejected: {0}")]
    Membership(String),

    /// The call did not complete in time; its outcome is indeterminate.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// No other voter is eligible to take over leadership.
    #[error("No eligible voter to transfer leadership to")]
    NoTransferTarget,

    /// Leadership transfer did not complete.
    #[error("Leadership transfer failed: {0}")]
    LeadershipTransfer(String),

    /// The engine stopped with a fatal error.
    #[error("Raft fatal error: {0}")]
    Fatal(String),

    /// Any other engine error.
    #[error("Raft error: {0}")]
    Raft(String),
}

/// Coarse classification of errors, used by callers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The node cannot start; fix the environment or configuration.
    FatalAtStartup,
    /// A guard rejected the request; retry against the leader or with fresh preconditions.
    RejectedByGuard,
    /// The engine could not complete the proposal; re-query state before retrying.
    ProposalFailure,
    /// Leadership could not be handed off during shutdown.
    ShutdownTransfer,
    /// Anything else.
    Internal,
}

impl ClusterError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            ClusterError::Config(_)
            | ClusterError::Storage(_)
            | ClusterError::Io(_)
            | ClusterError::AddressResolution { .. }
            | ClusterError::Transport(_)
            | ClusterError::AlreadyBootstrapped => ErrorClass::FatalAtStartup,

            ClusterError::NotLeader { .. }
            | ClusterError::ConfigurationUnavailable(_)
            | ClusterError::NotInitialized
            | ClusterError::DuplicateMember { .. }
            | ClusterError::StaleConfiguration { .. }
            | ClusterError::ServerIdConflict { .. } => ErrorClass::RejectedByGuard,

            ClusterError::Membership(_)
            | ClusterError::Timeout(_)
            | ClusterError::Fatal(_)
            | ClusterError::Network(_)
            | ClusterError::Raft(_) => ErrorClass::ProposalFailure,

            ClusterError::NoTransferTarget | ClusterError::LeadershipTransfer(_) => {
                ErrorClass::ShutdownTransfer
            }

            ClusterError::Serialization(_) => ErrorClass::Internal,
        }
    }

    /// Whether the proposal may still commit after this error was returned.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, ClusterError::Timeout(_) | ClusterError::Network(_))
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        ClusterError::Serialization(e.to_string())
    }
}

impl From<RaftError<ClientWriteError>> for ClusterError {
    fn from(e: RaftError<ClientWriteError>) -> Self {
        use openraft::error::RaftError;

        match e {
            RaftError::APIError(ClientWriteError::ForwardToLeader(forward)) => {
                ClusterError::NotLeader {
                    leader: forward.leader_node,
                }
            }
            RaftError::APIError(ClientWriteError::ChangeMembershipError(e)) => {
                ClusterError::Membership(e.to_string())
            }
            RaftError::Fatal(fatal) => ClusterError::Fatal(fatal.to_string()),
        }
    }
}

impl From<RaftError<InitializeError>> for ClusterError {
    fn from(e: RaftError<InitializeError>) -> Self {
        use openraft::error::RaftError;

        match e {
            RaftError::APIError(InitializeError::NotAllowed(_)) => ClusterError::AlreadyBootstrapped,
            RaftError::APIError(InitializeError::NotInMembers(e)) => {
                ClusterError::Config(e.to_string())
            }
            RaftError::Fatal(fatal) => ClusterError::Fatal(fatal.to_string()),
        }
    }
}

impl From<openraft::error::Fatal<u64>> for ClusterError {
    fn from(e: openraft::error::Fatal<u64>) -> Self {
        ClusterError::Fatal(e.to_string())
    }
}
