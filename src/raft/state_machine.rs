//! OpenRaft state machine bridge.
//!
//! Forwards committed entries to the application [`StateMachine`] and keeps
//! the engine's bookkeeping (last applied log id, last membership) beside
//! it. Snapshots built here are persisted through a [`SnapshotStore`].

use crate::command::CommandResponse;
use crate::state::{AppliedEntry, StateMachine};
use crate::store::{SnapshotStore, StoredSnapshot};
use crate::types::{
    ClusterEntry, ClusterLogId, ClusterSnapshot, ClusterSnapshotMeta, ClusterStorageError,
    ClusterStoredMembership, TypeConfig,
};
use openraft::storage::RaftStateMachine;
use openraft::{EntryPayload, RaftSnapshotBuilder, RaftTypeConfig, StorageIOError, StoredMembership};
use std::io::{self, Cursor};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Application state plus what the engine needs to know about it.
struct AppliedState {
    machine: Box<dyn StateMachine>,
    last_applied_log: Option<ClusterLogId>,
    last_membership: ClusterStoredMembership,
}

/// The state machine handed to the engine.
pub struct StateMachineStore {
    /// Held for a whole apply batch and while capturing snapshots.
    applied: RwLock<AppliedState>,
    snapshots: Arc<dyn SnapshotStore>,
    snapshot_idx: AtomicU64,
}

impl StateMachineStore {
    /// Wrap `machine`, restoring it from the latest stored snapshot if any.
    pub fn new(
        mut machine: Box<dyn StateMachine>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> io::Result<Self> {
        let mut last_applied_log = None;
        let mut last_membership = ClusterStoredMembership::default();

        if let Some(snapshot) = snapshots.latest()? {
            machine.restore(&mut snapshot.data.as_slice())?;
            last_applied_log = snapshot.meta.last_log_id;
            last_membership = snapshot.meta.last_membership.clone();
            tracing::info!(
                snapshot_id = %snapshot.meta.snapshot_id,
                "restored state machine from snapshot"
            );
        }

        Ok(Self {
            applied: RwLock::new(AppliedState {
                machine,
                last_applied_log,
                last_membership,
            }),
            snapshots,
            snapshot_idx: AtomicU64::new(0),
        })
    }

    /// Log id of the last entry applied locally.
    pub async fn last_applied(&self) -> Option<ClusterLogId> {
        self.applied.read().await.last_applied_log
    }
}

impl RaftSnapshotBuilder<TypeConfig> for Arc<StateMachineStore> {
    async fn build_snapshot(&mut self) -> Result<ClusterSnapshot, ClusterStorageError> {
        let applied = self.applied.read().await;
        let capture = applied
            .machine
            .snapshot()
            .map_err(|e| StorageIOError::read_state_machine(&e))?;
        let last_applied_log = applied.last_applied_log;
        let last_membership = applied.last_membership.clone();
        drop(applied);

        let mut data = Vec::new();
        capture
            .persist(&mut data)
            .map_err(|e| StorageIOError::read_state_machine(&e))?;

        let snapshot_idx = self.snapshot_idx.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot_id = match last_applied_log {
            Some(last) => format!("{}-{}-{}", last.leader_id, last.index, snapshot_idx),
            None => format!("--{}", snapshot_idx),
        };

        let meta = ClusterSnapshotMeta {
            last_log_id: last_applied_log,
            last_membership,
            snapshot_id,
        };

        let stored = StoredSnapshot {
            meta: meta.clone(),
            data,
        };
        self.snapshots
            .create(&stored)
            .map_err(|e| StorageIOError::write_snapshot(Some(meta.signature()), &e))?;

        Ok(ClusterSnapshot {
            meta,
            snapshot: Box::new(Cursor::new(stored.data)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for Arc<StateMachineStore> {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<ClusterLogId>, ClusterStoredMembership), ClusterStorageError> {
        let applied = self.applied.read().await;
        Ok((applied.last_applied_log, applied.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<CommandResponse>, ClusterStorageError>
    where
        I: IntoIterator<Item = ClusterEntry> + Send,
    {
        let mut responses = Vec::new();
        let mut applied = self.applied.write().await;

        for entry in entries {
            tracing::trace!(%entry.log_id, "applying to state machine");

            applied.last_applied_log = Some(entry.log_id);

            match entry.payload {
                EntryPayload::Blank => responses.push(CommandResponse::ok()),
                EntryPayload::Normal(cmd) => {
                    let response = applied.machine.apply(&AppliedEntry {
                        index: entry.log_id.index,
                        term: entry.log_id.leader_id.term,
                        data: &cmd.data,
                    });
                    responses.push(response);
                }
                EntryPayload::Membership(membership) => {
                    applied.last_membership =
                        StoredMembership::new(Some(entry.log_id), membership);
                    responses.push(CommandResponse::ok());
                }
            }
        }

        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        Arc::clone(self)
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<<TypeConfig as RaftTypeConfig>::SnapshotData>, ClusterStorageError> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &ClusterSnapshotMeta,
        snapshot: Box<<TypeConfig as RaftTypeConfig>::SnapshotData>,
    ) -> Result<(), ClusterStorageError> {
        let data = snapshot.into_inner();
        tracing::info!(
            snapshot_id = %meta.snapshot_id,
            snapshot_size = data.len(),
            "installing snapshot"
        );

        let mut applied = self.applied.write().await;
        applied
            .machine
            .restore(&mut data.as_slice())
            .map_err(|e| StorageIOError::read_snapshot(Some(meta.signature()), &e))?;
        applied.last_applied_log = meta.last_log_id;
        applied.last_membership = meta.last_membership.clone();
        drop(applied);

        self.snapshots
            .create(&StoredSnapshot {
                meta: meta.clone(),
                data,
            })
            .map_err(|e| StorageIOError::write_snapshot(Some(meta.signature()), &e))?;
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<ClusterSnapshot>, ClusterStorageError> {
        let latest = self
            .snapshots
            .latest()
            .map_err(|e| StorageIOError::read_snapshot(None, &e))?;

        Ok(latest.map(|snapshot| ClusterSnapshot {
            meta: snapshot.meta,
            snapshot: Box::new(Cursor::new(snapshot.data)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::state::{KvCommand, KvStateMachine};
    use crate::store::MemorySnapshotStore;
    use openraft::CommittedLeaderId;

    fn kv_entry(index: u64, key: &str, value: &str) -> ClusterEntry {
        let cmd = KvCommand::Set {
            key: key.to_string(),
            value: value.to_string(),
        };
        ClusterEntry {
            log_id: ClusterLogId::new(CommittedLeaderId::new(1, 0), index),
            payload: EntryPayload::Normal(cmd.to_command().expect("encode")),
        }
    }

    fn bridge(
        kv: &KvStateMachine,
        snapshots: &Arc<MemorySnapshotStore>,
    ) -> Arc<StateMachineStore> {
        Arc::new(
            StateMachineStore::new(Box::new(kv.clone()), snapshots.clone()).expect("bridge"),
        )
    }

    #[tokio::test]
    async fn test_apply_forwards_normal_entries() {
        let kv = KvStateMachine::new();
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let mut sm = bridge(&kv, &snapshots);

        let entries = vec![
            ClusterEntry {
                log_id: ClusterLogId::new(CommittedLeaderId::new(1, 0), 1),
                payload: EntryPayload::Blank,
            },
            kv_entry(2, "a", "1"),
            kv_entry(3, "b", "2"),
        ];
        let responses = sm.apply(entries).await.expect("apply");

        assert_eq!(responses.len(), 3);
        assert!(responses.iter().all(|r| r.success));
        assert_eq!(kv.get("a"), Some("1".to_string()));
        assert_eq!(sm.last_applied().await.map(|l| l.index), Some(3));
    }

    #[tokio::test]
    async fn test_invalid_payload_is_reported_not_fatal() {
        let kv = KvStateMachine::new();
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let mut sm = bridge(&kv, &snapshots);

        let entry = ClusterEntry {
            log_id: ClusterLogId::new(CommittedLeaderId::new(1, 0), 1),
            payload: EntryPayload::Normal(Command::new("garbage")),
        };
        let responses = sm.apply(vec![entry]).await.expect("apply");
        assert!(!responses[0].success);
        assert_eq!(sm.last_applied().await.map(|l| l.index), Some(1));
    }

    #[tokio::test]
    async fn test_snapshot_is_persisted_and_restored() {
        let kv = KvStateMachine::new();
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let mut sm = bridge(&kv, &snapshots);

        sm.apply(vec![kv_entry(1, "a", "1"), kv_entry(2, "b", "2")])
            .await
            .expect("apply");

        let mut builder = sm.get_snapshot_builder().await;
        let snapshot = builder.build_snapshot().await.expect("build snapshot");
        assert_eq!(snapshot.meta.last_log_id.map(|l| l.index), Some(2));

        let current = sm
            .get_current_snapshot()
            .await
            .expect("current snapshot")
            .expect("snapshot exists");
        assert_eq!(current.meta.snapshot_id, snapshot.meta.snapshot_id);

        // A new bridge over the same snapshot store starts from the snapshot.
        let restored_kv = KvStateMachine::new();
        let restored = bridge(&restored_kv, &snapshots);
        assert_eq!(restored_kv.get("b"), Some("2".to_string()));
        assert_eq!(restored.last_applied().await.map(|l| l.index), Some(2));
    }

    #[tokio::test]
    async fn test_install_snapshot_replaces_state() {
        let source_kv = KvStateMachine::new();
        let source_snapshots = Arc::new(MemorySnapshotStore::new());
        let mut source = bridge(&source_kv, &source_snapshots);
        source
            .apply(vec![kv_entry(1, "x", "from-leader")])
            .await
            .expect("apply");
        let snapshot = source
            .get_snapshot_builder()
            .await
            .build_snapshot()
            .await
            .expect("build snapshot");

        let target_kv = KvStateMachine::new();
        let target_snapshots = Arc::new(MemorySnapshotStore::new());
        let mut target = bridge(&target_kv, &target_snapshots);
        target
            .apply(vec![kv_entry(1, "stale", "value")])
            .await
            .expect("apply");

        target
            .install_snapshot(&snapshot.meta, snapshot.snapshot)
            .await
            .expect("install snapshot");

        assert_eq!(target_kv.get("x"), Some("from-leader".to_string()));
        assert!(target_kv.get("stale").is_none());
        assert!(target_snapshots.latest().expect("latest").is_some());
    }
}
