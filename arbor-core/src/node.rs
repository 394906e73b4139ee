//! Tree value type exchanged with storage and peers.
//!
//! A `TreeNode` is the owned, recursive form of the tree. It is what gets
//! serialized to JSON, persisted, and broadcast. Editing happens on the
//! arena form inside [`TreeMutator`](crate::mutator::TreeMutator).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deepest tree accepted anywhere, counting the root as level 1.
///
/// Each level costs two JSON nesting levels (object and `children` array)
/// and the wire envelopes add one more, so this keeps every snapshot under
/// serde_json's recursion limit of 128.
pub const MAX_DEPTH: usize = 48;

/// One node of the label tree, owning its children in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Create a node with no children.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            children: Vec::new(),
        }
    }

    /// Create a childless node with a freshly generated id.
    pub fn leaf(label: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), label)
    }

    /// Builder-style child append.
    pub fn with_child(mut self, child: TreeNode) -> Self {
        self.children.push(child);
        self
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// Levels in this subtree; a lone node has depth 1.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((node, level)) = stack.pop() {
            deepest = deepest.max(level);
            stack.extend(node.children.iter().map(|c| (c, level + 1)));
        }
        deepest
    }

    /// Depth-first search by id.
    pub fn find(&self, id: &str) -> Option<&TreeNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.id == id {
                return Some(node);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    /// Ids of the direct children, in order.
    pub fn child_ids(&self) -> Vec<&str> {
        self.children.iter().map(|c| c.id.as_str()).collect()
    }

    /// Check that every id in the subtree is unique and that it is at most
    /// [`MAX_DEPTH`] levels deep.
    ///
    /// Acyclicity and single-parenthood follow from the owned representation.
    pub fn validate(&self) -> Result<(), TreeError> {
        let mut seen = HashSet::with_capacity(64);
        let mut stack = vec![(self, 1usize)];
        while let Some((node, level)) = stack.pop() {
            if level > MAX_DEPTH {
                return Err(TreeError::TooDeep(level));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(TreeError::DuplicateId(node.id.clone()));
            }
            stack.extend(node.children.iter().map(|c| (c, level + 1)));
        }
        Ok(())
    }
}

/// Where a moved node lands relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    /// Immediately before the target, under the target's parent
    Before,
    /// Immediately after the target, under the target's parent
    After,
    /// Appended as the target's last child
    Inside,
}

impl Position {
    /// Classify a pointer drop by its vertical offset within the target row.
    ///
    /// Top quarter drops before, bottom quarter after, the middle inside.
    pub fn from_drop_offset(offset_y: f32, row_height: f32) -> Self {
        if offset_y < row_height * 0.25 {
            Position::Before
        } else if offset_y > row_height * 0.75 {
            Position::After
        } else {
            Position::Inside
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Position::Before => write!(f, "before"),
            Position::After => write!(f, "after"),
            Position::Inside => write!(f, "inside"),
        }
    }
}

/// Malformed tree errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The same id appears more than once
    DuplicateId(String),
    /// Nesting reaches the given level, past [`MAX_DEPTH`]
    TooDeep(usize),
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeError::DuplicateId(id) => write!(f, "Duplicate node id: {id}"),
            TreeError::TooDeep(level) => {
                write!(f, "Tree nests {level} levels deep (limit {MAX_DEPTH})")
            }
        }
    }
}

impl std::error::Error for TreeError {}
