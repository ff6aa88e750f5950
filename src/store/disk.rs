//! Embedded database store backed by sled.
//!
//! One database file holds two trees: `logs`, keyed by the big-endian log
//! index so that key order is index order, and `stable` for small records.
//! Every write is flushed before returning.

use super::{LogStore, StableStore};
use crate::types::ClusterEntry;
use sled::{Batch, IVec};
use std::io;
use std::path::Path;

const LOGS_TREE: &str = "logs";
const STABLE_TREE: &str = "stable";

fn sled_err(e: sled::Error) -> io::Error {
    io::Error::other(e)
}

fn index_to_key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

fn key_to_index(key: &[u8]) -> io::Result<u64> {
    let bytes: [u8; 8] = key.try_into().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid log key length {}", key.len()),
        )
    })?;
    Ok(u64::from_be_bytes(bytes))
}

fn decode_entry(value: &IVec) -> io::Result<ClusterEntry> {
    serde_json::from_slice(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Log and stable store in a single sled database.
pub struct SledStore {
    db: sled::Db,
    logs: sled::Tree,
    stable: sled::Tree,
}

impl SledStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let db = sled::open(path.as_ref()).map_err(sled_err)?;
        let logs = db.open_tree(LOGS_TREE).map_err(sled_err)?;
        let stable = db.open_tree(STABLE_TREE).map_err(sled_err)?;

        tracing::debug!(path = %path.as_ref().display(), "opened raft database");
        Ok(Self { db, logs, stable })
    }

    fn flush(&self) -> io::Result<()> {
        self.db.flush().map_err(sled_err)?;
        Ok(())
    }
}

impl LogStore for SledStore {
    fn first_index(&self) -> io::Result<Option<u64>> {
        match self.logs.first().map_err(sled_err)? {
            Some((key, _)) => key_to_index(&key).map(Some),
            None => Ok(None),
        }
    }

    fn last_entry(&self) -> io::Result<Option<ClusterEntry>> {
        match self.logs.last().map_err(sled_err)? {
            Some((_, value)) => decode_entry(&value).map(Some),
            None => Ok(None),
        }
    }

    fn get_log(&self, index: u64) -> io::Result<Option<ClusterEntry>> {
        match self.logs.get(index_to_key(index)).map_err(sled_err)? {
            Some(value) => decode_entry(&value).map(Some),
            None => Ok(None),
        }
    }

    fn get_range(&self, start: u64, end: u64) -> io::Result<Vec<ClusterEntry>> {
        if start > end {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for item in self.logs.range(index_to_key(start)..=index_to_key(end)) {
            let (_, value) = item.map_err(sled_err)?;
            entries.push(decode_entry(&value)?);
        }
        Ok(entries)
    }

    fn store_logs(&self, entries: &[ClusterEntry]) -> io::Result<()> {
        let mut batch = Batch::default();
        for entry in entries {
            let value = serde_json::to_vec(entry)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            batch.insert(&index_to_key(entry.log_id.index)[..], value);
        }

        self.logs.apply_batch(batch).map_err(sled_err)?;
        self.flush()
    }

    fn delete_range(&self, min: u64, max: u64) -> io::Result<()> {
        if min > max {
            return Ok(());
        }

        let mut batch = Batch::default();
        for item in self.logs.range(index_to_key(min)..=index_to_key(max)) {
            let (key, _) = item.map_err(sled_err)?;
            batch.remove(key);
        }

        self.logs.apply_batch(batch).map_err(sled_err)?;
        self.flush()
    }
}

impl StableStore for SledStore {
    fn set(&self, key: &str, value: &[u8]) -> io::Result<()> {
        self.stable.insert(key, value).map_err(sled_err)?;
        self.flush()
    }

    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self
            .stable
            .get(key)
            .map_err(sled_err)?
            .map(|v| v.to_vec()))
    }
}
