//! Per-session display state.
//!
//! Expand/collapse flags belong to one viewer and are never synchronized.
//! They are keyed by node id, not by arena key, so they survive a remote
//! snapshot replacing every node object.

use std::collections::HashMap;

use crate::mutator::TreeMutator;

/// Expand/collapse flags keyed by node id. Unknown ids read as expanded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    expanded: HashMap<String, bool>,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.get(id).copied().unwrap_or(true)
    }

    pub fn set_expanded(&mut self, id: impl Into<String>, expanded: bool) {
        self.expanded.insert(id.into(), expanded);
    }

    /// Flip the flag for `id` and return the new value.
    pub fn toggle(&mut self, id: &str) -> bool {
        let next = !self.is_expanded(id);
        self.expanded.insert(id.to_string(), next);
        next
    }

    /// Keep only entries whose ids exist in `tree`.
    ///
    /// Returns the number of entries discarded.
    pub fn retain_known(&mut self, tree: &TreeMutator) -> usize {
        let before = self.expanded.len();
        self.expanded.retain(|id, _| tree.contains(id));
        before - self.expanded.len()
    }

    /// Number of explicitly stored flags.
    pub fn len(&self) -> usize {
        self.expanded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expanded.is_empty()
    }
}

/// One line of the rendered tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleRow {
    pub id: String,
    pub label: String,
    pub depth: usize,
    pub has_children: bool,
    pub expanded: bool,
}

/// Depth-first rows, skipping the descendants of collapsed nodes.
pub fn visible_rows(tree: &TreeMutator, view: &ViewState) -> Vec<VisibleRow> {
    let arena = tree.arena();
    let mut rows = Vec::with_capacity(tree.len());
    let mut stack = vec![(tree.root_key(), 0usize)];

    while let Some((key, depth)) = stack.pop() {
        let Some(slot) = arena.get(key) else {
            continue;
        };
        let expanded = view.is_expanded(&slot.id);
        rows.push(VisibleRow {
            id: slot.id.clone(),
            label: slot.label.clone(),
            depth,
            has_children: !slot.children.is_empty(),
            expanded,
        });
        if expanded {
            // Reverse so the first child pops first
            stack.extend(slot.children.iter().rev().map(|c| (*c, depth + 1)));
        }
    }
    rows
}
