//! Append-only snapshot history.
//!
//! Architecture:
//! ```text
//! ┌────────────────┐  append(tree)   ┌──────────────────────────────────┐
//! │ SyncCoordinator│ ──────────────► │ SnapshotStore                    │
//! │ (commit lock)  │ ◄────────────── │  ├── RocksSnapshotStore (disk)   │
//! └────────────────┘  latest()       │  └── MemorySnapshotStore (tests, │
//!                                    │       no storage path)           │
//!                                    └──────────────────────────────────┘
//! ```
//!
//! Records are `(version_id, tree, created_at)`, immutable once written.
//! Version ids start at 1 and grow by one per append; only the newest
//! record is served to new clients.

pub mod memory;
pub mod rocks;

use std::time::SystemTime;

use arbor_core::TreeNode;
use serde::{Deserialize, Serialize};

pub use memory::MemorySnapshotStore;
pub use rocks::{RocksSnapshotStore, StoreConfig};

/// One persisted version of the whole tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub version_id: u64,
    pub tree: TreeNode,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
}

impl TreeSnapshot {
    /// Version 0: the bootstrap tree served before anything is persisted.
    pub fn bootstrap(tree: TreeNode) -> Self {
        Self {
            version_id: 0,
            tree,
            created_at: 0,
        }
    }
}

/// History listing entry (tree omitted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub version_id: u64,
    pub created_at: u64,
    pub node_count: usize,
}

impl From<&TreeSnapshot> for SnapshotInfo {
    fn from(s: &TreeSnapshot) -> Self {
        Self {
            version_id: s.version_id,
            created_at: s.created_at,
            node_count: s.tree.node_count(),
        }
    }
}

/// Versioned record store for tree snapshots.
///
/// Implementations never modify or delete a record once appended.
pub trait SnapshotStore: Send + Sync {
    /// Persist `tree` as the next version.
    fn append(&self, tree: &TreeNode) -> Result<TreeSnapshot, StoreError>;

    /// Newest snapshot, if any has been written.
    fn latest(&self) -> Result<Option<TreeSnapshot>, StoreError>;

    /// A specific version.
    fn get(&self, version_id: u64) -> Result<Option<TreeSnapshot>, StoreError>;

    /// Up to `limit` entries, newest first.
    fn history(&self, limit: usize) -> Result<Vec<SnapshotInfo>, StoreError>;

    /// Number of stored snapshots.
    fn len(&self) -> Result<u64, StoreError>;
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
    /// Store cannot accept requests (poisoned lock, closed handle)
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::Unavailable(e) => write!(f, "Store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
