//! Network layer for Raft RPC communication.
//!
//! This module implements the gRPC-based network transport for Raft messages
//! using tonic: the listener ([`Transport`]), the outgoing side
//! ([`NetworkFactory`]) and the incoming side ([`RaftServer`]).

mod client;
mod server;
mod transport;

pub use client::{NetworkConnection, NetworkFactory};
pub use server::RaftServer;
pub use transport::Transport;

use crate::types::NodeMeta;
use serde::{Deserialize, Serialize};

/// Sent by a leader handing off leadership: the receiver should campaign now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutNowRequest {
    /// The leader giving up leadership.
    pub leader: NodeMeta,
    /// The leader's current term.
    pub term: u64,
}

/// Reply to [`TimeoutNowRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutNowResponse {
    /// Whether the receiver started an election.
    pub accepted: bool,
}
