//! OpenRaft log storage over a [`LogStore`] and a [`StableStore`].
//!
//! Entries go to the log store. The vote and the committed and purged log
//! ids go to the stable store as JSON records.

use crate::store::{COMMITTED_KEY, LAST_PURGED_KEY, LogStore, StableStore, VOTE_KEY};
use crate::types::{ClusterEntry, ClusterLogId, ClusterStorageError, ClusterVote, TypeConfig};
use openraft::storage::{LogFlushed, RaftLogStorage};
use openraft::{LogState, RaftLogReader, StorageIOError};
use std::fmt::Debug;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

/// Log storage handed to the engine.
#[derive(Clone)]
pub struct LogStorage {
    log: Arc<dyn LogStore>,
    stable: Arc<dyn StableStore>,
}

impl LogStorage {
    /// Combine a log store and a stable store.
    pub fn new(log: Arc<dyn LogStore>, stable: Arc<dyn StableStore>) -> Self {
        Self { log, stable }
    }
}

/// Convert a range to inclusive bounds; `None` when it is empty.
fn inclusive_bounds<RB: RangeBounds<u64>>(range: &RB) -> Option<(u64, u64)> {
    let start = match range.start_bound() {
        Bound::Included(i) => *i,
        Bound::Excluded(i) => i.checked_add(1)?,
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(i) => *i,
        Bound::Excluded(i) => i.checked_sub(1)?,
        Bound::Unbounded => u64::MAX,
    };
    (start <= end).then_some((start, end))
}

impl RaftLogReader<TypeConfig> for LogStorage {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug>(
        &mut self,
        range: RB,
    ) -> Result<Vec<ClusterEntry>, ClusterStorageError> {
        let Some((start, end)) = inclusive_bounds(&range) else {
            return Ok(Vec::new());
        };
        let entries = self
            .log
            .get_range(start, end)
            .map_err(|e| StorageIOError::read_logs(&e))?;
        Ok(entries)
    }
}

impl RaftLogStorage<TypeConfig> for LogStorage {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, ClusterStorageError> {
        let last_log_id = self
            .log
            .last_entry()
            .map_err(|e| StorageIOError::read_logs(&e))?
            .map(|e| e.log_id);
        let last_purged_log_id: Option<ClusterLogId> = self
            .stable
            .get_json(LAST_PURGED_KEY)
            .map_err(|e| StorageIOError::read_logs(&e))?;

        Ok(LogState {
            last_purged_log_id,
            last_log_id: last_log_id.or(last_purged_log_id),
        })
    }

    async fn save_committed(
        &mut self,
        committed: Option<ClusterLogId>,
    ) -> Result<(), ClusterStorageError> {
        self.stable
            .set_json(COMMITTED_KEY, &committed)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<ClusterLogId>, ClusterStorageError> {
        let committed: Option<Option<ClusterLogId>> = self
            .stable
            .get_json(COMMITTED_KEY)
            .map_err(|e| StorageIOError::read_logs(&e))?;
        Ok(committed.flatten())
    }

    async fn save_vote(&mut self, vote: &ClusterVote) -> Result<(), ClusterStorageError> {
        self.stable
            .set_json(VOTE_KEY, vote)
            .map_err(|e| StorageIOError::write_vote(&e))?;
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<ClusterVote>, ClusterStorageError> {
        let vote = self
            .stable
            .get_json(VOTE_KEY)
            .map_err(|e| StorageIOError::read_vote(&e))?;
        Ok(vote)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), ClusterStorageError>
    where
        I: IntoIterator<Item = ClusterEntry>,
    {
        let entries: Vec<ClusterEntry> = entries.into_iter().collect();
        self.log
            .store_logs(&entries)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: ClusterLogId) -> Result<(), ClusterStorageError> {
        tracing::debug!(%log_id, "truncating log");
        self.log
            .delete_range(log_id.index, u64::MAX)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn purge(&mut self, log_id: ClusterLogId) -> Result<(), ClusterStorageError> {
        tracing::debug!(%log_id, "purging log");

        // Record the mark before deleting so a crash in between never loses it.
        self.stable
            .set_json(LAST_PURGED_KEY, &log_id)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        self.log
            .delete_range(0, log_id.index)
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }
}
