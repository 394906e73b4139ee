//! Local replica of the shared tree.
//!
//! The synchronous heart of a client session: the current tree, the viewer's
//! expand/collapse flags, and the rules for folding in snapshots from the
//! server. Network code drives it; nothing here blocks or allocates tasks.
//!
//! Merge rule for incoming snapshots (last writer wins at whole-tree
//! granularity):
//! 1. Build the index for the incoming tree; reject it if ids collide.
//! 2. Keep view flags whose ids still exist, drop the rest.
//! 3. Replace the local tree wholesale.

use crate::mutator::{MutationError, TreeMutator};
use crate::node::{Position, TreeError, TreeNode};
use crate::view::{visible_rows, ViewState, VisibleRow};

/// What happened to a snapshot handed to the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Replaced the local tree
    Applied { discarded_view_entries: usize },
    /// Identical to the local tree; nothing changed
    Unchanged,
    /// A fetched snapshot arrived after the subscription had already
    /// delivered a newer one, so it was ignored
    Superseded,
}

/// Local tree plus view state for one session.
#[derive(Debug, Clone, Default)]
pub struct Replica {
    tree: Option<TreeMutator>,
    view: ViewState,
    /// Set once the subscription has delivered a snapshot in the current sync round
    remote_seen: bool,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new sync round (initial connect or reconnect).
    pub fn begin_sync(&mut self) {
        self.remote_seen = false;
    }

    /// Whether a tree has been adopted yet.
    pub fn has_tree(&self) -> bool {
        self.tree.is_some()
    }

    /// Apply the snapshot returned by the initial fetch.
    ///
    /// Ignored if the subscription already delivered something this round,
    /// since broadcast snapshots are at least as new as the fetch.
    pub fn adopt_fetched(&mut self, tree: &TreeNode) -> Result<RemoteOutcome, TreeError> {
        if self.remote_seen {
            return Ok(RemoteOutcome::Superseded);
        }
        self.merge(tree)
    }

    /// Apply a snapshot received over the subscription.
    pub fn apply_remote(&mut self, tree: &TreeNode) -> Result<RemoteOutcome, TreeError> {
        let outcome = self.merge(tree)?;
        self.remote_seen = true;
        Ok(outcome)
    }

    fn merge(&mut self, incoming: &TreeNode) -> Result<RemoteOutcome, TreeError> {
        if let Some(current) = &self.tree {
            if current.snapshot() == *incoming {
                return Ok(RemoteOutcome::Unchanged);
            }
        }
        let next = TreeMutator::load(incoming)?;
        let discarded_view_entries = self.view.retain_known(&next);
        self.tree = Some(next);
        Ok(RemoteOutcome::Applied { discarded_view_entries })
    }

    // ─── Local mutations ──────────────────────────────────────────────
    //
    // Each returns the full snapshot to persist when the tree changed.

    pub fn rename(&mut self, id: &str, label: impl Into<String>) -> Result<TreeNode, MutationError> {
        let tree = self.tree_mut(id)?;
        tree.rename(id, label)?;
        Ok(tree.snapshot())
    }

    pub fn add(&mut self, parent_id: &str, node: TreeNode) -> Result<TreeNode, MutationError> {
        let tree = self.tree_mut(parent_id)?;
        tree.add(parent_id, node)?;
        Ok(tree.snapshot())
    }

    pub fn delete(&mut self, id: &str) -> Result<TreeNode, MutationError> {
        let tree = self.tree_mut(id)?;
        tree.delete(id)?;
        let snapshot = tree.snapshot();
        if let Some(tree) = &self.tree {
            self.view.retain_known(tree);
        }
        Ok(snapshot)
    }

    pub fn move_node(
        &mut self,
        source_id: &str,
        target_id: &str,
        position: Position,
    ) -> Result<TreeNode, MutationError> {
        let tree = self.tree_mut(source_id)?;
        tree.move_node(source_id, target_id, position)?;
        Ok(tree.snapshot())
    }

    fn tree_mut(&mut self, id: &str) -> Result<&mut TreeMutator, MutationError> {
        self.tree
            .as_mut()
            .ok_or_else(|| MutationError::NotFound(id.to_string()))
    }

    // ─── Accessors ────────────────────────────────────────────────────

    pub fn tree(&self) -> Option<&TreeMutator> {
        self.tree.as_ref()
    }

    pub fn snapshot(&self) -> Option<TreeNode> {
        self.tree.as_ref().map(TreeMutator::snapshot)
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Flip expand/collapse for `id`. View-only; never persisted.
    pub fn toggle_expanded(&mut self, id: &str) -> bool {
        self.view.toggle(id)
    }

    pub fn set_expanded(&mut self, id: &str, expanded: bool) {
        self.view.set_expanded(id, expanded);
    }

    /// Rows the rendering layer should draw, in order.
    pub fn visible_rows(&self) -> Vec<VisibleRow> {
        self.tree
            .as_ref()
            .map(|t| visible_rows(t, &self.view))
            .unwrap_or_default()
    }
}
