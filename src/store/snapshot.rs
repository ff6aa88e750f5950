//! Snapshots kept as files in a directory.
//!
//! Each snapshot lives in its own directory named
//! `{term:020}-{index:020}-{millis}` so that lexical order is creation order.
//! A snapshot is written under a `.tmp` name and renamed into place, so a
//! crash never leaves a half-written snapshot visible.

use super::{SnapshotStore, StoredSnapshot};
use crate::types::ClusterSnapshotMeta;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const META_FILE: &str = "meta.json";
const STATE_FILE: &str = "state.bin";
const TMP_SUFFIX: &str = ".tmp";

/// File-based snapshot store retaining the newest `retain` snapshots.
#[derive(Debug)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    retain: usize,
}

impl FileSnapshotStore {
    /// Open the store at `dir`, creating it and discarding partial writes.
    pub fn open(dir: impl Into<PathBuf>, retain: usize) -> io::Result<Self> {
        if retain == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "must retain at least one snapshot",
            ));
        }

        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().ends_with(TMP_SUFFIX) {
                tracing::warn!(path = %entry.path().display(), "removing partial snapshot");
                fs::remove_dir_all(entry.path())?;
            }
        }

        Ok(Self { dir, retain })
    }

    fn snapshot_name(meta: &ClusterSnapshotMeta) -> String {
        let (term, index) = meta
            .last_log_id
            .map(|log_id| (log_id.leader_id.term, log_id.index))
            .unwrap_or((0, 0));
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("{:020}-{:020}-{}", term, index, millis)
    }

    /// Completed snapshot directories, newest first.
    fn snapshot_dirs(&self) -> io::Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TMP_SUFFIX) || !entry.file_type()?.is_dir() {
                continue;
            }
            dirs.push(entry.path());
        }
        dirs.sort();
        dirs.reverse();
        Ok(dirs)
    }

    fn read_meta(dir: &Path) -> io::Result<ClusterSnapshotMeta> {
        let data = fs::read(dir.join(META_FILE))?;
        serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn prune(&self) -> io::Result<()> {
        for dir in self.snapshot_dirs()?.into_iter().skip(self.retain) {
            tracing::debug!(path = %dir.display(), "removing old snapshot");
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn create(&self, snapshot: &StoredSnapshot) -> io::Result<()> {
        let name = Self::snapshot_name(&snapshot.meta);
        let final_path = self.dir.join(&name);
        let tmp_path = self.dir.join(format!("{}{}", name, TMP_SUFFIX));

        if tmp_path.exists() {
            fs::remove_dir_all(&tmp_path)?;
        }
        fs::create_dir_all(&tmp_path)?;

        let meta = serde_json::to_vec_pretty(&snapshot.meta)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(tmp_path.join(META_FILE), meta)?;
        fs::write(tmp_path.join(STATE_FILE), &snapshot.data)?;

        if final_path.exists() {
            fs::remove_dir_all(&final_path)?;
        }
        fs::rename(&tmp_path, &final_path)?;

        tracing::info!(
            snapshot_id = %snapshot.meta.snapshot_id,
            size = snapshot.data.len(),
            "snapshot persisted"
        );

        self.prune()
    }

    fn latest(&self) -> io::Result<Option<StoredSnapshot>> {
        let Some(dir) = self.snapshot_dirs()?.into_iter().next() else {
            return Ok(None);
        };

        let meta = Self::read_meta(&dir)?;
        let data = fs::read(dir.join(STATE_FILE))?;
        Ok(Some(StoredSnapshot { meta, data }))
    }

    fn list(&self) -> io::Result<Vec<ClusterSnapshotMeta>> {
        self.snapshot_dirs()?
            .iter()
            .map(|dir| Self::read_meta(dir))
            .collect()
    }
}
