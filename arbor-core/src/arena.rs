//! Slot arena holding the editable form of the tree.
//!
//! Nodes refer to their children by `NodeKey` instead of owning them, so a
//! move is a pair of `Vec` edits plus one index update, with no ownership
//! juggling. Freed slots are recycled through a free list.

use crate::node::TreeNode;

/// Stable handle to a live arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(usize);

impl NodeKey {
    /// Raw slot position (diagnostics only).
    pub fn slot(&self) -> usize {
        self.0
    }
}

/// A node as stored in the arena.
#[derive(Debug, Clone)]
pub struct Slot {
    pub id: String,
    pub label: String,
    pub children: Vec<NodeKey>,
}

/// Vec-backed storage for tree nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    live: usize,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arena pre-sized for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Store a childless node.
    pub fn alloc(&mut self, id: impl Into<String>, label: impl Into<String>) -> NodeKey {
        let slot = Slot {
            id: id.into(),
            label: label.into(),
            children: Vec::new(),
        };
        self.live += 1;
        match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(slot);
                NodeKey(i)
            }
            None => {
                self.slots.push(Some(slot));
                NodeKey(self.slots.len() - 1)
            }
        }
    }

    /// Copy an owned subtree into the arena, returning the key of its root.
    pub fn alloc_subtree(&mut self, node: &TreeNode) -> NodeKey {
        let root = self.alloc(node.id.clone(), node.label.clone());
        let mut stack = vec![(root, node)];
        while let Some((key, owned)) = stack.pop() {
            for child in &owned.children {
                let child_key = self.alloc(child.id.clone(), child.label.clone());
                if let Some(slot) = self.get_mut(key) {
                    slot.children.push(child_key);
                }
                stack.push((child_key, child));
            }
        }
        root
    }

    /// Release a subtree, returning the ids of every freed node.
    pub fn free_subtree(&mut self, key: NodeKey) -> Vec<String> {
        let mut freed = Vec::new();
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            if let Some(slot) = self.slots.get_mut(k.0).and_then(Option::take) {
                stack.extend(slot.children.iter().copied());
                freed.push(slot.id);
                self.free.push(k.0);
                self.live -= 1;
            }
        }
        freed
    }

    pub fn get(&self, key: NodeKey) -> Option<&Slot> {
        self.slots.get(key.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut Slot> {
        self.slots.get_mut(key.0).and_then(Option::as_mut)
    }

    /// Whether `needle` is `root` or lies anywhere beneath it.
    ///
    /// Walks only the subtree under `root`, so cost is bounded by its size.
    pub fn subtree_contains(&self, root: NodeKey, needle: NodeKey) -> bool {
        let mut stack = vec![root];
        while let Some(k) = stack.pop() {
            if k == needle {
                return true;
            }
            if let Some(slot) = self.get(k) {
                stack.extend(slot.children.iter().copied());
            }
        }
        false
    }

    /// Levels in the subtree under `key`; a leaf has depth 1.
    pub fn subtree_depth(&self, key: NodeKey) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(key, 1usize)];
        while let Some((k, level)) = stack.pop() {
            if let Some(slot) = self.get(k) {
                deepest = deepest.max(level);
                stack.extend(slot.children.iter().map(|c| (*c, level + 1)));
            }
        }
        deepest
    }

    /// Rebuild the owned form of the subtree rooted at `key`.
    pub fn to_tree(&self, key: NodeKey) -> Option<TreeNode> {
        struct Frame<'a> {
            slot: &'a Slot,
            next: usize,
            children: Vec<TreeNode>,
        }

        let root = self.get(key)?;
        let mut frames = vec![Frame {
            slot: root,
            next: 0,
            children: Vec::with_capacity(root.children.len()),
        }];
        while let Some(frame) = frames.last_mut() {
            let next = frame.slot.children.get(frame.next).copied();
            if let Some(child) = next {
                frame.next += 1;
                if let Some(slot) = self.get(child) {
                    frames.push(Frame {
                        slot,
                        next: 0,
                        children: Vec::with_capacity(slot.children.len()),
                    });
                }
                continue;
            }
            let done = frames.pop()?;
            let node = TreeNode {
                id: done.slot.id.clone(),
                label: done.slot.label.clone(),
                children: done.children,
            };
            match frames.last_mut() {
                Some(parent) => parent.children.push(node),
                None => return Some(node),
            }
        }
        None
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
