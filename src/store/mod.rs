//! Durability backends for the consensus engine.
//!
//! The engine needs three kinds of storage:
//!
//! - a **log store** holding replicated entries by index,
//! - a **stable store** holding small durable records (vote, commit and purge marks),
//! - a **snapshot store** holding point-in-time state machine images.
//!
//! [`Stores::open`] picks the backends from the node configuration:
//!
//! ```text
//! in_memory = true            in_memory = false
//! ┌──────────────────────┐    ┌───────────────────────────────────────┐
//! │ MemoryStore (log)    │    │ LogCache(512) ─► SledStore raft.db    │
//! │ MemoryStore (stable) │    │ SledStore raft.db (stable tree)       │
//! │ MemorySnapshotStore  │    │ FileSnapshotStore snapshots/ (keep 2) │
//! └──────────────────────┘    └───────────────────────────────────────┘
//! ```

mod cache;
mod disk;
mod memory;
mod snapshot;

pub use cache::LogCache;
pub use disk::SledStore;
pub use memory::{MemorySnapshotStore, MemoryStore};
pub use snapshot::FileSnapshotStore;

use crate::config::NodeConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::types::{ClusterEntry, ClusterSnapshotMeta};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// File name of the embedded database inside the data directory.
pub const RAFT_DB_FILE: &str = "raft.db";

/// Directory holding snapshot files inside the data directory.
pub const SNAPSHOT_DIR: &str = "snapshots";

/// Stable store key of the persisted vote.
pub const VOTE_KEY: &str = "vote";

/// Stable store key of the last committed log id.
pub const COMMITTED_KEY: &str = "committed";

/// Stable store key of the last purged log id.
pub const LAST_PURGED_KEY: &str = "last_purged";

/// Storage of replicated log entries.
///
/// Indexes are inclusive on both ends in every range operation.
pub trait LogStore: Send + Sync {
    /// Index of the first stored entry.
    fn first_index(&self) -> io::Result<Option<u64>>;

    /// The last stored entry.
    fn last_entry(&self) -> io::Result<Option<ClusterEntry>>;

    /// A single entry.
    fn get_log(&self, index: u64) -> io::Result<Option<ClusterEntry>>;

    /// Entries in `start..=end`, in index order.
    fn get_range(&self, start: u64, end: u64) -> io::Result<Vec<ClusterEntry>>;

    /// Persist entries, overwriting any with the same index.
    fn store_logs(&self, entries: &[ClusterEntry]) -> io::Result<()>;

    /// Delete entries in `min..=max`.
    fn delete_range(&self, min: u64, max: u64) -> io::Result<()>;
}

/// Durable key/value storage for small records.
pub trait StableStore: Send + Sync {
    /// Store a value.
    fn set(&self, key: &str, value: &[u8]) -> io::Result<()>;

    /// Load a value.
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>>;
}

impl dyn StableStore {
    /// Store a JSON-encoded value.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> io::Result<()> {
        let data = serde_json::to_vec(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.set(key, &data)
    }

    /// Load a JSON-encoded value.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> io::Result<Option<T>> {
        match self.get(key)? {
            Some(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            None => Ok(None),
        }
    }
}

/// A snapshot as kept by a [`SnapshotStore`].
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    /// Snapshot metadata.
    pub meta: ClusterSnapshotMeta,
    /// Serialized state data.
    pub data: Vec<u8>,
}

/// Storage of state machine snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot and prune old ones.
    fn create(&self, snapshot: &StoredSnapshot) -> io::Result<()>;

    /// The most recent snapshot.
    fn latest(&self) -> io::Result<Option<StoredSnapshot>>;

    /// Metadata of retained snapshots, newest first.
    fn list(&self) -> io::Result<Vec<ClusterSnapshotMeta>>;
}

/// The three storage handles handed to the consensus engine.
#[derive(Clone)]
pub struct Stores {
    /// Log entries.
    pub log: Arc<dyn LogStore>,
    /// Vote and log marks.
    pub stable: Arc<dyn StableStore>,
    /// State machine snapshots.
    pub snapshots: Arc<dyn SnapshotStore>,
}

impl Stores {
    /// Volatile stores; nothing survives a restart.
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            log: store.clone(),
            stable: store,
            snapshots: Arc::new(MemorySnapshotStore::new()),
        }
    }

    /// Durable stores under `data_dir`.
    pub fn persistent(
        data_dir: &Path,
        log_cache_capacity: usize,
        retain_snapshots: usize,
    ) -> ClusterResult<Self> {
        std::fs::create_dir_all(data_dir)?;

        let db = SledStore::open(data_dir.join(RAFT_DB_FILE)).map_err(|e| {
            ClusterError::Storage(format!(
                "failed to open {}: {}",
                data_dir.join(RAFT_DB_FILE).display(),
                e
            ))
        })?;
        let db = Arc::new(db);

        let log = LogCache::new(db.clone(), log_cache_capacity)
            .map_err(|e| ClusterError::Config(e.to_string()))?;

        let snapshots = FileSnapshotStore::open(data_dir.join(SNAPSHOT_DIR), retain_snapshots)
            .map_err(|e| ClusterError::Storage(format!("failed to open snapshot store: {}", e)))?;

        Ok(Self {
            log: Arc::new(log),
            stable: db,
            snapshots: Arc::new(snapshots),
        })
    }

    /// Select stores according to the node configuration.
    pub fn open(config: &NodeConfig) -> ClusterResult<Self> {
        if config.in_memory {
            tracing::info!("using in-memory raft stores");
            return Ok(Self::in_memory());
        }

        let data_dir = config
            .data_dir
            .as_deref()
            .ok_or_else(|| ClusterError::Config("data_dir is required".to_string()))?;

        let stores = Self::persistent(
            data_dir,
            config.storage.log_cache_capacity,
            config.snapshot.retain,
        )?;
        tracing::info!(data_dir = %data_dir.display(), "using persistent raft stores");
        Ok(stores)
    }

    /// Whether any durable raft state already exists.
    pub fn has_existing_state(&self) -> io::Result<bool> {
        if self.log.last_entry()?.is_some() {
            return Ok(true);
        }
        if self.stable.get(VOTE_KEY)?.is_some() {
            return Ok(true);
        }
        Ok(self.snapshots.latest()?.is_some())
    }
}
