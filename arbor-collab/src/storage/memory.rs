//! In-memory snapshot history, used when no storage path is configured.

use std::sync::RwLock;

use arbor_core::TreeNode;

use super::{now_millis, SnapshotInfo, SnapshotStore, StoreError, TreeSnapshot};

/// Append-only `Vec` of snapshots behind a lock.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<Vec<TreeSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("snapshot lock poisoned".into())
}

impl SnapshotStore for MemorySnapshotStore {
    fn append(&self, tree: &TreeNode) -> Result<TreeSnapshot, StoreError> {
        let mut snapshots = self.snapshots.write().map_err(poisoned)?;
        let snapshot = TreeSnapshot {
            version_id: snapshots.len() as u64 + 1,
            tree: tree.clone(),
            created_at: now_millis(),
        };
        snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    fn latest(&self) -> Result<Option<TreeSnapshot>, StoreError> {
        Ok(self.snapshots.read().map_err(poisoned)?.last().cloned())
    }

    fn get(&self, version_id: u64) -> Result<Option<TreeSnapshot>, StoreError> {
        let snapshots = self.snapshots.read().map_err(poisoned)?;
        Ok(version_id
            .checked_sub(1)
            .and_then(|i| snapshots.get(i as usize))
            .cloned())
    }

    fn history(&self, limit: usize) -> Result<Vec<SnapshotInfo>, StoreError> {
        let snapshots = self.snapshots.read().map_err(poisoned)?;
        Ok(snapshots.iter().rev().take(limit).map(SnapshotInfo::from).collect())
    }

    fn len(&self) -> Result<u64, StoreError> {
        Ok(self.snapshots.read().map_err(poisoned)?.len() as u64)
    }
}
