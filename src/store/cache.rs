//! Read cache in front of a durable log store.

use super::LogStore;
use crate::types::ClusterEntry;
use lru::LruCache;
use parking_lot::Mutex;
use std::io;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Keeps the most recently appended entries in memory.
///
/// Writes go to the inner store first and are cached only once durable.
/// Replication mostly reads entries that were just appended, so this saves
/// a database read per follower per entry.
pub struct LogCache {
    inner: Arc<dyn LogStore>,
    cache: Mutex<LruCache<u64, ClusterEntry>>,
}

impl LogCache {
    /// Wrap `inner` with a cache of `capacity` entries.
    pub fn new(inner: Arc<dyn LogStore>, capacity: usize) -> io::Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "log cache capacity must be greater than zero",
            )
        })?;

        Ok(Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    fn cached_range(&self, start: u64, end: u64) -> Option<Vec<ClusterEntry>> {
        let span = end.checked_sub(start)?.checked_add(1)?;
        let mut cache = self.cache.lock();
        if span > cache.cap().get() as u64 {
            return None;
        }

        let mut entries = Vec::with_capacity(span as usize);
        for index in start..=end {
            entries.push(cache.get(&index)?.clone());
        }
        Some(entries)
    }
}

impl LogStore for LogCache {
    fn first_index(&self) -> io::Result<Option<u64>> {
        self.inner.first_index()
    }

    fn last_entry(&self) -> io::Result<Option<ClusterEntry>> {
        self.inner.last_entry()
    }

    fn get_log(&self, index: u64) -> io::Result<Option<ClusterEntry>> {
        if let Some(entry) = self.cache.lock().get(&index) {
            return Ok(Some(entry.clone()));
        }
        self.inner.get_log(index)
    }

    fn get_range(&self, start: u64, end: u64) -> io::Result<Vec<ClusterEntry>> {
        if let Some(entries) = self.cached_range(start, end) {
            return Ok(entries);
        }
        self.inner.get_range(start, end)
    }

    fn store_logs(&self, entries: &[ClusterEntry]) -> io::Result<()> {
        self.inner.store_logs(entries)?;

        let mut cache = self.cache.lock();
        for entry in entries {
            cache.put(entry.log_id.index, entry.clone());
        }
        Ok(())
    }

    fn delete_range(&self, min: u64, max: u64) -> io::Result<()> {
        // Clear first so a failed delete never leaves stale entries readable.
        self.cache.lock().clear();
        self.inner.delete_range(min, max)
    }
}
