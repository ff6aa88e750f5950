//! Application commands carried in the Raft log.
//!
//! The engine treats these as opaque payloads. They are serialized into the
//! log and handed to the state machine in the same order on every member.

use serde::{Deserialize, Serialize};

/// An application command replicated through Raft consensus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Opaque payload interpreted by the state machine.
    pub data: Vec<u8>,
}

impl Command {
    /// Wrap a payload.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// Encode a value as a JSON payload.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            data: serde_json::to_vec(value)?,
        })
    }
}

/// Response from applying a command to the state machine.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CommandResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if failed.
    pub error: Option<String>,
    /// Additional data returned by the state machine.
    pub data: Option<Vec<u8>>,
}

impl CommandResponse {
    /// Create a success response.
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            data: None,
        }
    }

    /// Create an error response.
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(msg.into()),
            data: None,
        }
    }

    /// Create a success response with data.
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
        }
    }
}
