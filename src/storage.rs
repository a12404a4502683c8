use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::leaderboard::{Batch, Entry};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default)]
struct Snapshots {
    batches: BTreeMap<u64, Arc<Batch>>,
    latest: Option<u64>,
}

type SharedSnapshots = Arc<RwLock<Snapshots>>;

/// Versioned in-memory copies of the leaderboard, keyed by creation time in milliseconds.
///
/// Cloning gives another handle on the same store. Batches are handed out as `Arc<Batch>`, so a
/// reader holds the lock only long enough to clone the handle.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    data: SharedSnapshots,
    retention: Duration,
}

impl SnapshotStore {
    pub fn new(retention: Duration) -> SnapshotStore {
        SnapshotStore {
            data: Arc::new(RwLock::new(Snapshots::default())),
            retention,
        }
    }

    /// Store `entries` as the new latest batch and return its id. Ownership of the entries moves
    /// into the store, nothing outside can alter them afterwards.
    pub fn put(&self, entries: Vec<Entry>) -> u64 {
        self.put_at(entries, Utc::now())
    }

    pub fn put_at(&self, entries: Vec<Entry>, now: DateTime<Utc>) -> u64 {
        let now_ms = now.timestamp_millis().max(0) as u64;
        let mut data = self.write();

        // Ids must keep increasing even when the clock did not move (or moved back).
        let id = match data.batches.keys().next_back() {
            Some(last) if *last >= now_ms => last + 1,
            _ => now_ms,
        };
        data.batches.insert(id, Arc::new(Batch::new(id, entries)));
        data.latest = Some(id);

        let cutoff = now_ms.saturating_sub(self.retention.as_millis() as u64);
        let outdated = data
            .batches
            .range(..cutoff)
            .map(|(old, _)| *old)
            .filter(|old| *old != id && Some(*old) != data.latest)
            .collect::<Vec<u64>>();
        for old in outdated {
            data.batches.remove(&old);
            debug!("Evicted leaderboard batch {old}");
        }

        id
    }

    pub fn get(&self, id: u64) -> Option<Arc<Batch>> {
        self.read().batches.get(&id).cloned()
    }

    pub fn latest(&self) -> Option<u64> {
        self.read().latest
    }

    pub fn latest_batch(&self) -> Option<Arc<Batch>> {
        let data = self.read();
        data.latest.and_then(|id| data.batches.get(&id).cloned())
    }

    pub fn ids(&self) -> Vec<u64> {
        self.read().batches.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Writers never panic while holding the lock, a poisoned lock still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, Snapshots> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Snapshots> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        SnapshotStore::new(DEFAULT_RETENTION)
    }
}
