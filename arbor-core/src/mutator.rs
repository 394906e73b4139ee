//! Structural tree operations.
//!
//! `TreeMutator` owns one tree in arena form together with its index and
//! keeps the two in lockstep: every operation either leaves both untouched
//! and returns an error, or updates both before returning `Ok`.
//!
//! Errors here are advisory. Callers at the session boundary treat them as
//! no-ops; they exist so tests and logs can tell *why* nothing happened.

use crate::arena::{NodeArena, NodeKey};
use crate::index::TreeIndex;
use crate::node::{Position, TreeError, TreeNode, MAX_DEPTH};

/// Why a move was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRejection {
    /// Source and target are the same node
    SelfMove,
    /// Target lies inside the source's subtree (would form a cycle)
    IntoDescendant,
    /// Before/after the root: the root has no parent to hold siblings
    RootSibling,
    /// The root itself cannot be relocated
    MoveRoot,
    /// The subtree would end up nested past `MAX_DEPTH`
    TooDeep,
}

/// Mutation failures. All of them leave the tree unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Id not present in the index
    NotFound(String),
    /// Added node reuses an id already in the tree
    DuplicateId(String),
    /// The root cannot be deleted
    RootImmutable,
    /// Move refused
    InvalidMove(MoveRejection),
    /// The result would nest this many levels, past `MAX_DEPTH`
    TooDeep(usize),
}

impl std::fmt::Display for MutationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationError::NotFound(id) => write!(f, "Node not found: {id}"),
            MutationError::DuplicateId(id) => write!(f, "Node id already in use: {id}"),
            MutationError::RootImmutable => write!(f, "The root node cannot be deleted"),
            MutationError::InvalidMove(r) => write!(f, "Invalid move: {r:?}"),
            MutationError::TooDeep(level) => {
                write!(f, "Tree would nest {level} levels deep (limit {MAX_DEPTH})")
            }
        }
    }
}

impl std::error::Error for MutationError {}

impl From<TreeError> for MutationError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::DuplicateId(id) => MutationError::DuplicateId(id),
            TreeError::TooDeep(level) => MutationError::TooDeep(level),
        }
    }
}

/// An editable tree: arena storage, id index, and root key.
#[derive(Debug, Clone)]
pub struct TreeMutator {
    arena: NodeArena,
    index: TreeIndex,
    root: NodeKey,
}

impl TreeMutator {
    /// Load a snapshot, building the index with one full traversal.
    ///
    /// Rejects snapshots with duplicate ids, since the index could not
    /// represent them.
    pub fn load(tree: &TreeNode) -> Result<Self, TreeError> {
        tree.validate()?;
        let mut arena = NodeArena::with_capacity(tree.node_count());
        let root = arena.alloc_subtree(tree);
        let mut index = TreeIndex::new();
        index.index(&arena, root);
        Ok(Self { arena, index, root })
    }

    /// Owned copy of the current tree.
    pub fn snapshot(&self) -> TreeNode {
        // The root slot is never freed
        self.arena
            .to_tree(self.root)
            .unwrap_or_else(|| TreeNode::new("", ""))
    }

    /// Id of the root node.
    pub fn root_id(&self) -> &str {
        self.arena.get(self.root).map_or("", |s| s.id.as_str())
    }

    pub fn root_key(&self) -> NodeKey {
        self.root
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub fn index(&self) -> &TreeIndex {
        &self.index
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn label(&self, id: &str) -> Option<&str> {
        let key = self.index.get(id)?;
        self.arena.get(key).map(|s| s.label.as_str())
    }

    /// Id of the parent of `id` (`None` for the root or unknown ids).
    pub fn parent_id(&self, id: &str) -> Option<&str> {
        let key = self.index.get_parent(id)?;
        self.arena.get(key).map(|s| s.id.as_str())
    }

    /// Ids of the children of `id`, in order.
    pub fn children_ids(&self, id: &str) -> Option<Vec<&str>> {
        let key = self.index.get(id)?;
        let slot = self.arena.get(key)?;
        Some(
            slot.children
                .iter()
                .filter_map(|c| self.arena.get(*c).map(|s| s.id.as_str()))
                .collect(),
        )
    }

    // ─── Operations ───────────────────────────────────────────────────

    /// Set the label of `id`.
    pub fn rename(&mut self, id: &str, label: impl Into<String>) -> Result<(), MutationError> {
        let key = self.key_of(id)?;
        let slot = self
            .arena
            .get_mut(key)
            .ok_or_else(|| MutationError::NotFound(id.to_string()))?;
        slot.label = label.into();
        Ok(())
    }

    /// Append `node` (and any children it carries) as the last child of `parent_id`.
    pub fn add(&mut self, parent_id: &str, node: TreeNode) -> Result<(), MutationError> {
        let parent = self.key_of(parent_id)?;
        node.validate()?;
        if let Some(clash) = Self::first_known_id(&self.index, &node) {
            return Err(MutationError::DuplicateId(clash));
        }
        let deepest = self.level_of(parent) + node.depth();
        if deepest > MAX_DEPTH {
            return Err(MutationError::TooDeep(deepest));
        }

        let key = self.arena.alloc_subtree(&node);
        if let Some(slot) = self.arena.get_mut(parent) {
            slot.children.push(key);
        }
        self.index.insert(&self.arena, key, Some(parent));
        Ok(())
    }

    /// Remove `id` and its whole subtree.
    pub fn delete(&mut self, id: &str) -> Result<(), MutationError> {
        let key = self.key_of(id)?;
        if key == self.root {
            return Err(MutationError::RootImmutable);
        }
        let parent = self
            .index
            .get_parent(id)
            .ok_or_else(|| MutationError::NotFound(id.to_string()))?;

        self.detach(parent, key);
        self.index.remove(&self.arena, id);
        self.arena.free_subtree(key);
        Ok(())
    }

    /// Relocate the subtree at `source_id` relative to `target_id`.
    pub fn move_node(
        &mut self,
        source_id: &str,
        target_id: &str,
        position: Position,
    ) -> Result<(), MutationError> {
        if source_id == target_id {
            return Err(MutationError::InvalidMove(MoveRejection::SelfMove));
        }
        let source = self.key_of(source_id)?;
        let target = self.key_of(target_id)?;

        if source == self.root {
            return Err(MutationError::InvalidMove(MoveRejection::MoveRoot));
        }
        // Walk the source's subtree, not the whole tree
        if self.arena.subtree_contains(source, target) {
            return Err(MutationError::InvalidMove(MoveRejection::IntoDescendant));
        }
        let new_parent = match position {
            Position::Inside => target,
            Position::Before | Position::After => self
                .index
                .get_parent(target_id)
                .ok_or(MutationError::InvalidMove(MoveRejection::RootSibling))?,
        };
        if self.level_of(new_parent) + self.arena.subtree_depth(source) > MAX_DEPTH {
            return Err(MutationError::InvalidMove(MoveRejection::TooDeep));
        }
        let old_parent = self
            .index
            .get_parent(source_id)
            .ok_or_else(|| MutationError::NotFound(source_id.to_string()))?;

        // Detach first so the target's offset is measured without the source
        self.detach(old_parent, source);

        let Some(siblings) = self.arena.get_mut(new_parent).map(|s| &mut s.children) else {
            return Err(MutationError::NotFound(target_id.to_string()));
        };
        match position {
            Position::Inside => siblings.push(source),
            Position::Before | Position::After => {
                let at = siblings.iter().position(|k| *k == target).unwrap_or(siblings.len());
                let at = if position == Position::After { at + 1 } else { at };
                siblings.insert(at.min(siblings.len()), source);
            }
        }

        self.index.reparent(source_id, Some(new_parent));
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn key_of(&self, id: &str) -> Result<NodeKey, MutationError> {
        self.index
            .get(id)
            .ok_or_else(|| MutationError::NotFound(id.to_string()))
    }

    /// Level of `key` counting the root as 1. Bounded by `MAX_DEPTH`.
    fn level_of(&self, key: NodeKey) -> usize {
        let mut level = 1;
        let mut current = key;
        while let Some(parent) = self.arena.get(current).and_then(|s| self.index.get_parent(&s.id)) {
            level += 1;
            current = parent;
        }
        level
    }

    fn detach(&mut self, parent: NodeKey, child: NodeKey) {
        if let Some(slot) = self.arena.get_mut(parent) {
            slot.children.retain(|k| *k != child);
        }
    }

    fn first_known_id(index: &TreeIndex, node: &TreeNode) -> Option<String> {
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if index.contains(&n.id) {
                return Some(n.id.clone());
            }
            stack.extend(n.children.iter());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Root(1) → [A(2) → [A1(4), A2(5)], B(3)]
    fn sample() -> TreeMutator {
        let tree = TreeNode::new("1", "Root")
            .with_child(
                TreeNode::new("2", "A")
                    .with_child(TreeNode::new("4", "A1"))
                    .with_child(TreeNode::new("5", "A2")),
            )
            .with_child(TreeNode::new("3", "B"));
        TreeMutator::load(&tree).unwrap()
    }

    /// Every arena node is indexed under the right parent and vice versa.
    fn assert_consistent(m: &TreeMutator) {
        let tree = m.snapshot();
        assert!(tree.validate().is_ok(), "snapshot must stay well-formed");
        assert_eq!(tree.node_count(), m.index().len());
        assert_eq!(m.index().len(), m.arena().len());

        let mut stack = vec![(&tree, None::<&str>)];
        while let Some((node, parent)) = stack.pop() {
            assert!(m.contains(&node.id));
            assert_eq!(m.parent_id(&node.id), parent, "parent of {}", node.id);
            for c in &node.children {
                stack.push((c, Some(node.id.as_str())));
            }
        }
    }

    #[test]
    fn test_load_rejects_duplicate_ids() {
        let tree = TreeNode::new("1", "Root")
            .with_child(TreeNode::new("2", "A"))
            .with_child(TreeNode::new("2", "B"));
        assert!(TreeMutator::load(&tree).is_err());
    }

    #[test]
    fn test_load_snapshot_roundtrip() {
        let m = sample();
        assert_eq!(m.root_id(), "1");
        assert_eq!(m.len(), 5);
        assert_eq!(TreeMutator::load(&m.snapshot()).unwrap().snapshot(), m.snapshot());
        assert_consistent(&m);
    }

    #[test]
    fn test_rename() {
        let mut m = sample();
        m.rename("4", "Renamed").unwrap();
        assert_eq!(m.label("4"), Some("Renamed"));
        assert_eq!(m.snapshot().find("4").unwrap().label, "Renamed");
    }

    #[test]
    fn test_rename_unknown_is_noop() {
        let mut m = sample();
        let before = m.snapshot();
        assert_eq!(m.rename("99", "x"), Err(MutationError::NotFound("99".into())));
        assert_eq!(m.snapshot(), before);
    }

    #[test]
    fn test_add_appends_in_order() {
        let mut m = TreeMutator::load(
            &TreeNode::new("1", "Root").with_child(TreeNode::new("2", "A")),
        )
        .unwrap();
        m.add("1", TreeNode::new("3", "B")).unwrap();
        assert_eq!(m.children_ids("1").unwrap(), vec!["2", "3"]);
        assert_eq!(m.parent_id("3"), Some("1"));
        assert_consistent(&m);
    }

    #[test]
    fn test_add_subtree_registers_descendants() {
        let mut m = sample();
        let sub = TreeNode::new("6", "C").with_child(TreeNode::new("7", "C1"));
        m.add("3", sub).unwrap();
        assert_eq!(m.parent_id("7"), Some("6"));
        assert_consistent(&m);
    }

    #[test]
    fn test_add_rejects_unknown_parent_and_duplicates() {
        let mut m = sample();
        let before = m.snapshot();
        assert_eq!(
            m.add("99", TreeNode::new("6", "x")),
            Err(MutationError::NotFound("99".into()))
        );
        assert_eq!(
            m.add("3", TreeNode::new("4", "dup")),
            Err(MutationError::DuplicateId("4".into()))
        );
        assert_eq!(m.snapshot(), before);
        assert_consistent(&m);
    }

    #[test]
    fn test_delete_removes_subtree_from_tree_and_index() {
        let mut m = sample();
        m.delete("2").unwrap();
        for id in ["2", "4", "5"] {
            assert!(m.index().get(id).is_none());
            assert!(m.snapshot().find(id).is_none());
        }
        assert_eq!(m.children_ids("1").unwrap(), vec!["3"]);
        assert_consistent(&m);
    }

    #[test]
    fn test_delete_root_and_unknown_are_noops() {
        let mut m = sample();
        let before = m.snapshot();
        assert_eq!(m.delete("1"), Err(MutationError::RootImmutable));
        assert_eq!(m.delete("99"), Err(MutationError::NotFound("99".into())));
        assert_eq!(m.snapshot(), before);
    }

    #[test]
    fn test_move_inside_appends_last() {
        let mut m = sample();
        m.move_node("3", "2", Position::Inside).unwrap();
        assert_eq!(m.children_ids("2").unwrap(), vec!["4", "5", "3"]);
        assert_eq!(m.children_ids("1").unwrap(), vec!["2"]);
        assert_eq!(m.parent_id("3"), Some("2"));
        assert_consistent(&m);
    }

    #[test]
    fn test_move_inside_descendant_rejected() {
        let mut m = sample();
        let before = m.snapshot();
        assert_eq!(
            m.move_node("2", "4", Position::Inside),
            Err(MutationError::InvalidMove(MoveRejection::IntoDescendant))
        );
        assert_eq!(m.snapshot(), before);
        assert_consistent(&m);
    }

    #[test]
    fn test_move_relative_to_descendant_rejected() {
        let mut m = sample();
        let before = m.snapshot();
        for pos in [Position::Before, Position::After] {
            assert_eq!(
                m.move_node("2", "5", pos),
                Err(MutationError::InvalidMove(MoveRejection::IntoDescendant))
            );
        }
        assert_eq!(m.snapshot(), before);
    }

    #[test]
    fn test_move_self_rejected_for_every_position() {
        let mut m = sample();
        for pos in [Position::Before, Position::After, Position::Inside] {
            assert_eq!(
                m.move_node("2", "2", pos),
                Err(MutationError::InvalidMove(MoveRejection::SelfMove))
            );
        }
    }

    #[test]
    fn test_move_root_boundaries() {
        let mut m = sample();
        assert_eq!(
            m.move_node("3", "1", Position::Before),
            Err(MutationError::InvalidMove(MoveRejection::RootSibling))
        );
        assert_eq!(
            m.move_node("1", "3", Position::Inside),
            Err(MutationError::InvalidMove(MoveRejection::MoveRoot))
        );
        // Inside the root is fine
        m.move_node("4", "1", Position::Inside).unwrap();
        assert_eq!(m.children_ids("1").unwrap(), vec!["2", "3", "4"]);
        assert_consistent(&m);
    }

    #[test]
    fn test_move_before_and_after_across_parents() {
        let mut m = sample();
        m.move_node("3", "4", Position::Before).unwrap();
        assert_eq!(m.children_ids("2").unwrap(), vec!["3", "4", "5"]);
        m.move_node("4", "5", Position::After).unwrap();
        assert_eq!(m.children_ids("2").unwrap(), vec!["3", "5", "4"]);
        assert_eq!(m.parent_id("3"), Some("2"));
        assert_consistent(&m);
    }

    #[test]
    fn test_redundant_move_is_stable() {
        let mut m = TreeMutator::load(
            &TreeNode::new("1", "Root")
                .with_child(TreeNode::new("2", "A"))
                .with_child(TreeNode::new("3", "B")),
        )
        .unwrap();
        m.move_node("2", "3", Position::Before).unwrap();
        assert_eq!(m.children_ids("1").unwrap(), vec!["2", "3"]);
        m.move_node("3", "2", Position::After).unwrap();
        assert_eq!(m.children_ids("1").unwrap(), vec!["2", "3"]);
    }

    #[test]
    fn test_move_within_same_parent_reorders() {
        let mut m = sample();
        m.move_node("2", "3", Position::After).unwrap();
        assert_eq!(m.children_ids("1").unwrap(), vec!["3", "2"]);
        m.move_node("5", "4", Position::Before).unwrap();
        assert_eq!(m.children_ids("2").unwrap(), vec!["5", "4"]);
        assert_consistent(&m);
    }

    #[test]
    fn test_move_unknown_ids() {
        let mut m = sample();
        assert_eq!(
            m.move_node("99", "2", Position::Inside),
            Err(MutationError::NotFound("99".into()))
        );
        assert_eq!(
            m.move_node("2", "99", Position::Inside),
            Err(MutationError::NotFound("99".into()))
        );
    }

    #[test]
    fn test_mixed_sequence_keeps_index_exact() {
        let mut m = sample();
        m.add("4", TreeNode::new("6", "Deep")).unwrap();
        m.move_node("2", "3", Position::Inside).unwrap();
        m.move_node("6", "1", Position::Inside).unwrap();
        m.delete("3").unwrap();
        m.rename("6", "Top").unwrap();
        m.add("6", TreeNode::new("7", "Under")).unwrap();

        assert_eq!(m.children_ids("1").unwrap(), vec!["6"]);
        assert_eq!(m.children_ids("6").unwrap(), vec!["7"]);
        for gone in ["2", "3", "4", "5"] {
            assert!(!m.contains(gone));
        }
        assert_consistent(&m);
    }

    /// Root(0) → 1 → 2 → … with `levels` nodes in one chain.
    fn chain(levels: usize) -> TreeMutator {
        let tree = (0..levels - 1).rev().fold(TreeNode::new((levels - 1).to_string(), "n"), |child, i| {
            TreeNode::new(i.to_string(), "n").with_child(child)
        });
        TreeMutator::load(&tree).unwrap()
    }

    #[test]
    fn test_load_rejects_too_deep() {
        let mut tree = TreeNode::new(MAX_DEPTH.to_string(), "n");
        for i in (0..MAX_DEPTH).rev() {
            tree = TreeNode::new(i.to_string(), "n").with_child(tree);
        }
        assert_eq!(TreeMutator::load(&tree).unwrap_err(), TreeError::TooDeep(MAX_DEPTH + 1));
    }

    #[test]
    fn test_add_past_depth_limit_rejected() {
        let mut m = chain(MAX_DEPTH - 1);
        let tip = (MAX_DEPTH - 2).to_string();

        // Filling the last level is allowed
        m.add(&tip, TreeNode::new("last", "n")).unwrap();
        assert_eq!(m.snapshot().depth(), MAX_DEPTH);

        let before = m.snapshot();
        assert_eq!(
            m.add("last", TreeNode::new("over", "n")),
            Err(MutationError::TooDeep(MAX_DEPTH + 1))
        );
        // A two-level subtree under the tip overflows too
        let pair = TreeNode::new("a", "n").with_child(TreeNode::new("b", "n"));
        assert_eq!(m.add(&tip, pair), Err(MutationError::TooDeep(MAX_DEPTH + 1)));
        assert_eq!(m.snapshot(), before);
        assert_consistent(&m);
    }

    #[test]
    fn test_move_past_depth_limit_rejected() {
        let mut m = chain(MAX_DEPTH);
        let tip = (MAX_DEPTH - 1).to_string();
        // Two-level subtree hanging off the root
        m.add("0", TreeNode::new("x", "n").with_child(TreeNode::new("y", "n")))
            .unwrap();
        let before = m.snapshot();

        for pos in [Position::Inside, Position::Before, Position::After] {
            assert_eq!(
                m.move_node("x", &tip, pos),
                Err(MutationError::InvalidMove(MoveRejection::TooDeep)),
                "{pos}"
            );
        }
        assert_eq!(m.snapshot(), before);

        // A single leaf still fits beside the tip
        m.move_node("y", &tip, Position::After).unwrap();
        let tip_parent = (MAX_DEPTH - 2).to_string();
        assert_eq!(m.parent_id("y"), Some(tip_parent.as_str()));
        assert_eq!(m.snapshot().depth(), MAX_DEPTH);
        assert_consistent(&m);
    }

    #[test]
    fn test_error_display() {
        assert!(MutationError::NotFound("x".into()).to_string().contains("not found"));
        assert!(MutationError::InvalidMove(MoveRejection::SelfMove)
            .to_string()
            .contains("SelfMove"));
    }
}
