//! Membership and lifecycle control for nodes of a Raft consensus group.
//!
//! This crate runs a member of a replicated group on top of OpenRaft: it
//! provides the stores and transport the engine needs, bridges committed
//! entries to an application state machine, bootstraps or joins the group,
//! enforces leader-only membership changes and hands leadership off before a
//! leader exits.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        ClusterNode                            │
//! │                                                               │
//! │  ClusterService ──► MembershipController ──► EventPublisher   │
//! │   (join/leave)              │                                 │
//! │                             ▼                                 │
//! │  ShutdownCoordinator ──► RaftGroup (ConsensusGroup)           │
//! │                             │                                 │
//! │            ┌────────────────┼─────────────────┐               │
//! │            ▼                ▼                 ▼               │
//! │       LogStorage    StateMachineStore   NetworkFactory        │
//! │     (log + stable)  (StateMachine +       (tonic, pooled)     │
//! │            │          SnapshotStore)          │               │
//! │            ▼                                  ▼               │
//! │   sled raft.db / memory               RaftServer (peers)      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use raftkeeper::{ClusterNode, KvCommand, KvStateMachine, NodeConfig};
//!
//! // First node: empty join_addr bootstraps a new cluster.
//! let config = NodeConfig::builder()
//!     .server_id("n1")
//!     .bind_addr("10.0.0.1")
//!     .raft_bind_port(8300)
//!     .data_dir("/var/lib/raftkeeper")
//!     .build()?;
//! let node = ClusterNode::start(config, Box::new(KvStateMachine::new())).await?;
//!
//! // Later nodes join through any member.
//! let config = NodeConfig::builder()
//!     .server_id("n2")
//!     .bind_addr("10.0.0.2")
//!     .join_addr("10.0.0.1:8300")
//!     .in_memory(true)
//!     .build()?;
//! let mut follower = ClusterNode::start(config, Box::new(KvStateMachine::new())).await?;
//!
//! // Replicate a command through the leader.
//! let cmd = KvCommand::Set { key: "a".into(), value: "1".into() }.to_command()?;
//! node.apply(cmd, Duration::from_secs(5)).await?;
//!
//! // Hands leadership off first when needed.
//! follower.shutdown().await?;
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod membership;
pub mod network;
pub mod proto;
pub mod raft;
pub mod service;
pub mod shutdown;
pub mod state;
pub mod store;
pub mod types;

// Re-export main types
pub use command::{Command, CommandResponse};
pub use config::NodeConfig;
pub use error::{ClusterError, ClusterResult, ErrorClass};
pub use membership::{
    BroadcastQueue, ClusterEvent, ConsensusGroup, EventAction, EventPublisher,
    MembershipController, Phase,
};
pub use raft::{ClusterNode, RaftGroup};
pub use service::{ClusterServiceImpl, MembershipReply, StatusReply};
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome};
pub use state::{KvCommand, KvStateMachine, NoopStateMachine, StateMachine};
pub use store::Stores;
pub use types::{
    ClusterConfiguration, ClusterNodeId, ClusterServer, NodeMeta, ServerAddress, ServerId,
    Suffrage, TypeConfig,
};
