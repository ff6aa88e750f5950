//! Volatile stores for ephemeral and test nodes.

use super::{LogStore, SnapshotStore, StableStore, StoredSnapshot};
use crate::types::{ClusterEntry, ClusterSnapshotMeta};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::io;

/// In-memory log and stable store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    logs: RwLock<BTreeMap<u64, ClusterEntry>>,
    kv: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryStore {
    fn first_index(&self) -> io::Result<Option<u64>> {
        Ok(self.logs.read().keys().next().copied())
    }

    fn last_entry(&self) -> io::Result<Option<ClusterEntry>> {
        Ok(self.logs.read().values().next_back().cloned())
    }

    fn get_log(&self, index: u64) -> io::Result<Option<ClusterEntry>> {
        Ok(self.logs.read().get(&index).cloned())
    }

    fn get_range(&self, start: u64, end: u64) -> io::Result<Vec<ClusterEntry>> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .logs
            .read()
            .range(start..=end)
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn store_logs(&self, entries: &[ClusterEntry]) -> io::Result<()> {
        let mut logs = self.logs.write();
        for entry in entries {
            logs.insert(entry.log_id.index, entry.clone());
        }
        Ok(())
    }

    fn delete_range(&self, min: u64, max: u64) -> io::Result<()> {
        if min > max {
            return Ok(());
        }
        let mut logs = self.logs.write();
        let keys: Vec<u64> = logs.range(min..=max).map(|(k, _)| *k).collect();
        for key in keys {
            logs.remove(&key);
        }
        Ok(())
    }
}

impl StableStore for MemoryStore {
    fn set(&self, key: &str, value: &[u8]) -> io::Result<()> {
        self.kv.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.kv.read().get(key).cloned())
    }
}

/// In-memory snapshot store keeping only the latest snapshot.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    latest: RwLock<Option<StoredSnapshot>>,
}

impl MemorySnapshotStore {
    /// Create an empty snapshot store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn create(&self, snapshot: &StoredSnapshot) -> io::Result<()> {
        *self.latest.write() = Some(snapshot.clone());
        Ok(())
    }

    fn latest(&self) -> io::Result<Option<StoredSnapshot>> {
        Ok(self.latest.read().clone())
    }

    fn list(&self) -> io::Result<Vec<ClusterSnapshotMeta>> {
        Ok(self
            .latest
            .read()
            .as_ref()
            .map(|s| vec![s.meta.clone()])
            .unwrap_or_default())
    }
}
