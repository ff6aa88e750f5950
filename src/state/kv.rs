//! Replicated key/value map.

use super::{AppliedEntry, StateMachine, StateSnapshot};
use crate::command::{Command, CommandResponse};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::Arc;

/// Commands understood by [`KvStateMachine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum KvCommand {
    /// Set a key, returning the previous value.
    Set { key: String, value: String },
    /// Delete a key, returning the removed value.
    Delete { key: String },
}

impl KvCommand {
    /// Encode as a log command.
    pub fn to_command(&self) -> Result<Command, serde_json::Error> {
        Command::json(self)
    }
}

/// Key/value state machine.
///
/// Clones share the same map, so the application can keep a handle for
/// local (eventually consistent) reads while the engine owns another.
#[derive(Debug, Default, Clone)]
pub struct KvStateMachine {
    data: Arc<RwLock<BTreeMap<String, String>>>,
}

impl KvStateMachine {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a key from the local replica.
    pub fn get(&self, key: &str) -> Option<String> {
        self.data.read().get(key).cloned()
    }

    /// Number of keys in the local replica.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the local replica is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

struct KvSnapshot {
    data: BTreeMap<String, String>,
}

impl StateSnapshot for KvSnapshot {
    fn persist(&self, sink: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer(sink, &self.data).map_err(io::Error::from)
    }
}

impl StateMachine for KvStateMachine {
    fn apply(&mut self, entry: &AppliedEntry<'_>) -> CommandResponse {
        let command: KvCommand = match serde_json::from_slice(entry.data) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!(index = entry.index, error = %e, "undecodable kv command");
                return CommandResponse::err(format!("invalid command: {}", e));
            }
        };

        let previous = {
            let mut data = self.data.write();
            match command {
                KvCommand::Set { key, value } => data.insert(key, value),
                KvCommand::Delete { key } => data.remove(&key),
            }
        };

        match previous {
            Some(value) => CommandResponse::with_data(value.into_bytes()),
            None => CommandResponse::ok(),
        }
    }

    fn snapshot(&self) -> io::Result<Box<dyn StateSnapshot>> {
        Ok(Box::new(KvSnapshot {
            data: self.data.read().clone(),
        }))
    }

    fn restore(&mut self, source: &mut dyn Read) -> io::Result<()> {
        let restored: BTreeMap<String, String> =
            serde_json::from_reader(source).map_err(io::Error::from)?;
        *self.data.write() = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut KvStateMachine, index: u64, cmd: KvCommand) -> CommandResponse {
        let command = cmd.to_command().expect("encode");
        sm.apply(&AppliedEntry {
            index,
            term: 1,
            data: &command.data,
        })
    }

    #[test]
    fn test_set_and_delete() {
        let mut sm = KvStateMachine::new();

        let first = apply(
            &mut sm,
            1,
            KvCommand::Set {
                key: "a".into(),
                value: "1".into(),
            },
        );
        assert!(first.success);
        assert!(first.data.is_none());

        let second = apply(
            &mut sm,
            2,
            KvCommand::Set {
                key: "a".into(),
                value: "2".into(),
            },
        );
        assert_eq!(second.data, Some(b"1".to_vec()));
        assert_eq!(sm.get("a"), Some("2".to_string()));

        let removed = apply(&mut sm, 3, KvCommand::Delete { key: "a".into() });
        assert_eq!(removed.data, Some(b"2".to_vec()));
        assert!(sm.is_empty());
    }

    #[test]
    fn test_invalid_command_rejected() {
        let mut sm = KvStateMachine::new();
        let response = sm.apply(&AppliedEntry {
            index: 1,
            term: 1,
            data: b"not json",
        });
        assert!(!response.success);
        assert!(response.error.is_some());
    }

    #[test]
    fn test_restore_reproduces_snapshot() {
        let mut sm = KvStateMachine::new();
        for i in 0..10 {
            apply(
                &mut sm,
                i + 1,
                KvCommand::Set {
                    key: format!("key-{}", i),
                    value: format!("value-{}", i),
                },
            );
        }

        let snapshot = sm.snapshot().expect("snapshot");

        // Later applies must not leak into the capture.
        apply(
            &mut sm,
            11,
            KvCommand::Set {
                key: "late".into(),
                value: "x".into(),
            },
        );

        let mut buf = Vec::new();
        snapshot.persist(&mut buf).expect("persist");

        let mut restored = KvStateMachine::new();
        restored.restore(&mut buf.as_slice()).expect("restore");
        assert_eq!(restored.len(), 10);
        assert_eq!(restored.get("key-3"), Some("value-3".to_string()));
        assert!(restored.get("late").is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let mut engine_side = KvStateMachine::new();
        let reader = engine_side.clone();

        apply(
            &mut engine_side,
            1,
            KvCommand::Set {
                key: "k".into(),
                value: "v".into(),
            },
        );
        assert_eq!(reader.get("k"), Some("v".to_string()));
    }

    #[test]
    fn test_command_wire_form() {
        let json = serde_json::to_string(&KvCommand::Delete { key: "x".into() }).expect("encode");
        assert_eq!(json, r#"{"op":"delete","key":"x"}"#);
    }
}
