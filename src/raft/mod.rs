//! Raft integration module.
//!
//! This module ties the stores, the application state machine and the
//! network to a running openraft instance:
//! - Log storage (`RaftLogStorage` over [`crate::store`])
//! - State machine bridge (`RaftStateMachine` over [`crate::state`])
//! - The group handle used by membership and shutdown
//! - [`ClusterNode`], which wires all of it together

mod group;
mod log_storage;
mod node;
mod state_machine;

pub use group::RaftGroup;
pub use log_storage::LogStorage;
pub use node::ClusterNode;
pub use state_machine::StateMachineStore;
