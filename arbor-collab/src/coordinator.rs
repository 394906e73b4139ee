//! Server-side authority over the shared tree.
//!
//! Owns the snapshot history and the session registry. Commits are serialized
//! by one async lock held from "append to store" through "publish to
//! broadcast", so version order and broadcast order are the same order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arbor_core::{TreeError, TreeNode};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, BroadcastStats, Subscription};
use crate::storage::{SnapshotStore, StoreError, TreeSnapshot};

/// The first-run tree served before anything has been persisted.
pub fn default_tree() -> TreeNode {
    TreeNode::new("1738626455208", "Root")
        .with_child(
            TreeNode::new("1738626455209", "Node 1")
                .with_child(TreeNode::new("1738626455210", "Leaf 1"))
                .with_child(TreeNode::new("1738626455211", "Leaf 2")),
        )
        .with_child(
            TreeNode::new("1738626455212", "Node 2")
                .with_child(TreeNode::new("1738626455213", "Leaf 3")),
        )
}

/// Why a commit was refused.
#[derive(Debug, Clone)]
pub enum CommitError {
    /// The submitted tree is malformed
    Invalid(TreeError),
    /// The store could not persist it
    Persistence(StoreError),
}

impl std::fmt::Display for CommitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitError::Invalid(e) => write!(f, "Invalid tree: {e}"),
            CommitError::Persistence(e) => write!(f, "Persistence failure: {e}"),
        }
    }
}

impl std::error::Error for CommitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommitError::Invalid(e) => Some(e),
            CommitError::Persistence(e) => Some(e),
        }
    }
}

impl From<StoreError> for CommitError {
    fn from(e: StoreError) -> Self {
        CommitError::Persistence(e)
    }
}

impl From<TreeError> for CommitError {
    fn from(e: TreeError) -> Self {
        CommitError::Invalid(e)
    }
}

/// Authoritative history plus fan-out for one tree.
pub struct SyncCoordinator {
    store: Arc<dyn SnapshotStore>,
    group: BroadcastGroup,
    commit_lock: Mutex<()>,
    commits: AtomicU64,
}

impl SyncCoordinator {
    pub fn new(store: Arc<dyn SnapshotStore>, broadcast_capacity: usize) -> Self {
        Self {
            store,
            group: BroadcastGroup::new(broadcast_capacity),
            commit_lock: Mutex::new(()),
            commits: AtomicU64::new(0),
        }
    }

    /// Newest persisted snapshot, or the default tree as version 0.
    pub async fn latest(&self) -> Result<TreeSnapshot, StoreError> {
        let store = self.store.clone();
        let latest = blocking(move || store.latest()).await?;
        Ok(latest.unwrap_or_else(|| TreeSnapshot::bootstrap(default_tree())))
    }

    /// Persist `tree` as the next version, then broadcast it to every session
    /// except `origin`. Returns the new version id.
    ///
    /// A broadcast failure never fails the commit: the snapshot is durable and
    /// later fetches will see it.
    pub async fn commit(&self, tree: TreeNode, origin: Option<Uuid>) -> Result<u64, CommitError> {
        tree.validate()?;

        let _guard = self.commit_lock.lock().await;
        let store = self.store.clone();
        let record = blocking(move || store.append(&tree)).await?;
        self.commits.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Committed v{} ({} nodes){}",
            record.version_id,
            record.tree.node_count(),
            origin.map(|o| format!(" from session {o}")).unwrap_or_default()
        );

        let exclude = match origin {
            Some(id) if self.group.has_session(&id).await => Some(id),
            _ => None,
        };
        if let Err(e) = self.broadcast(&record.tree, exclude) {
            log::warn!("Broadcast of v{} failed: {e}", record.version_id);
        }
        Ok(record.version_id)
    }

    /// Queue a `treeUpdate` frame for every session except `exclude`.
    pub fn broadcast(
        &self,
        tree: &TreeNode,
        exclude: Option<Uuid>,
    ) -> Result<usize, crate::protocol::ProtocolError> {
        self.group.broadcast(tree, exclude)
    }

    pub async fn register(&self, session_id: Uuid) -> Subscription {
        self.group.register(session_id).await
    }

    pub async fn deregister(&self, session_id: &Uuid) -> bool {
        self.group.deregister(session_id).await.is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.group.session_count().await
    }

    pub async fn broadcast_stats(&self) -> BroadcastStats {
        self.group.stats().await
    }

    /// Commits accepted since startup.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }
}

/// Run a store call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
}
