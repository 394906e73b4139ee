//! Id lookups over the arena.
//!
//! `TreeIndex` is derived state: it maps every live id to its arena key and
//! to the key of its parent. It is rebuilt wholesale when a new snapshot
//! arrives and patched in place by each mutation.
//!
//! Every operation on an unknown id is a no-op that reports "not found"
//! through its return value. Remote snapshots can replace the tree between
//! a user gesture and the mutation it triggers, so absence is expected.

use std::collections::HashMap;

use crate::arena::{NodeArena, NodeKey};

/// id → node and id → parent mappings.
#[derive(Debug, Clone, Default)]
pub struct TreeIndex {
    nodes: HashMap<String, NodeKey>,
    /// Absent for the root
    parents: HashMap<String, NodeKey>,
}

impl TreeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from scratch by walking the tree under `root`.
    pub fn index(&mut self, arena: &NodeArena, root: NodeKey) {
        self.nodes.clear();
        self.parents.clear();
        self.insert(arena, root, None);
    }

    /// Key of the node with this id.
    pub fn get(&self, id: &str) -> Option<NodeKey> {
        self.nodes.get(id).copied()
    }

    /// Key of the parent of `id`; `None` for the root or an unknown id.
    pub fn get_parent(&self, id: &str) -> Option<NodeKey> {
        self.parents.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Register `key` and its whole subtree, attaching `key` to `parent`.
    ///
    /// Returns the number of ids registered.
    pub fn insert(&mut self, arena: &NodeArena, key: NodeKey, parent: Option<NodeKey>) -> usize {
        let mut registered = 0;
        let mut stack = vec![(key, parent)];
        while let Some((k, p)) = stack.pop() {
            let Some(slot) = arena.get(k) else {
                continue;
            };
            self.nodes.insert(slot.id.clone(), k);
            match p {
                Some(pk) => {
                    self.parents.insert(slot.id.clone(), pk);
                }
                None => {
                    self.parents.remove(&slot.id);
                }
            }
            stack.extend(slot.children.iter().map(|c| (*c, Some(k))));
            registered += 1;
        }
        registered
    }

    /// Deregister `id` and everything beneath it.
    ///
    /// Must run before the arena frees the subtree. Returns the number of
    /// ids removed, or `None` if `id` was not indexed.
    pub fn remove(&mut self, arena: &NodeArena, id: &str) -> Option<usize> {
        let key = self.nodes.get(id).copied()?;
        let mut removed = 0;
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            let Some(slot) = arena.get(k) else {
                continue;
            };
            self.nodes.remove(&slot.id);
            self.parents.remove(&slot.id);
            stack.extend(slot.children.iter().copied());
            removed += 1;
        }
        Some(removed)
    }

    /// Point `id` at a new parent. O(1).
    ///
    /// Only the index changes; the caller has already moved the node in the
    /// arena. Returns `false` if `id` is unknown.
    pub fn reparent(&mut self, id: &str, new_parent: Option<NodeKey>) -> bool {
        if !self.nodes.contains_key(id) {
            return false;
        }
        match new_parent {
            Some(p) => {
                self.parents.insert(id.to_string(), p);
            }
            None => {
                self.parents.remove(id);
            }
        }
        true
    }

    /// Number of indexed ids.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All indexed ids, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TreeNode;

    fn build() -> (NodeArena, NodeKey, TreeIndex) {
        let tree = TreeNode::new("1", "Root")
            .with_child(
                TreeNode::new("2", "A")
                    .with_child(TreeNode::new("4", "A1"))
                    .with_child(TreeNode::new("5", "A2")),
            )
            .with_child(TreeNode::new("3", "B"));
        let mut arena = NodeArena::new();
        let root = arena.alloc_subtree(&tree);
        let mut index = TreeIndex::new();
        index.index(&arena, root);
        (arena, root, index)
    }

    #[test]
    fn test_index_resolves_every_id() {
        let (arena, root, index) = build();
        assert_eq!(index.len(), 5);
        for id in ["1", "2", "3", "4", "5"] {
            let key = index.get(id).unwrap();
            assert_eq!(arena.get(key).unwrap().id, id);
        }
        assert_eq!(index.get("1"), Some(root));
    }

    #[test]
    fn test_parent_lookup() {
        let (_arena, root, index) = build();
        assert_eq!(index.get_parent("1"), None);
        assert_eq!(index.get_parent("2"), Some(root));
        assert_eq!(index.get_parent("4"), index.get("2"));
        assert_eq!(index.get_parent("missing"), None);
    }

    #[test]
    fn test_insert_registers_subtree() {
        let (mut arena, _root, mut index) = build();
        let parent = index.get("3").unwrap();
        let sub = TreeNode::new("6", "New").with_child(TreeNode::new("7", "Deep"));
        let key = arena.alloc_subtree(&sub);

        assert_eq!(index.insert(&arena, key, Some(parent)), 2);
        assert_eq!(index.get_parent("6"), Some(parent));
        assert_eq!(index.get_parent("7"), Some(key));
    }

    #[test]
    fn test_remove_deregisters_subtree() {
        let (arena, _root, mut index) = build();
        assert_eq!(index.remove(&arena, "2"), Some(3));
        for id in ["2", "4", "5"] {
            assert!(index.get(id).is_none());
            assert!(index.get_parent(id).is_none());
        }
        assert!(index.contains("3"));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_unknown_ids_are_not_found() {
        let (arena, root, mut index) = build();
        assert_eq!(index.remove(&arena, "nope"), None);
        assert!(!index.reparent("nope", Some(root)));
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_reparent_only_touches_parent_entry() {
        let (_arena, _root, mut index) = build();
        let b = index.get("3").unwrap();
        assert!(index.reparent("4", Some(b)));
        assert_eq!(index.get_parent("4"), Some(b));
        assert_eq!(index.get_parent("5"), index.get("2"));
    }

    #[test]
    fn test_reindex_replaces_previous_state() {
        let (_arena, _root, mut index) = build();
        let mut other = NodeArena::new();
        let root = other.alloc_subtree(&TreeNode::new("x", "Other"));
        index.index(&other, root);
        assert_eq!(index.len(), 1);
        assert!(index.get("1").is_none());
        let mut ids: Vec<&str> = index.ids().collect();
        ids.sort();
        assert_eq!(ids, vec!["x"]);
    }
}
