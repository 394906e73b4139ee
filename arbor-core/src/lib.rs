//! # arbor-core — Shared label tree engine
//!
//! Network-free building blocks for collaborative tree editing. Everything here is
//! synchronous and in-memory; `arbor-collab` moves snapshots between processes.
//!
//! ## Architecture
//!
//! ```text
//!  TreeNode (wire value)
//!        │ load / snapshot
//!        ▼
//! ┌─────────────┐   id → key, id → parent   ┌─────────────┐
//! │ NodeArena   │ ◄───────────────────────► │ TreeIndex   │
//! │ (slots)     │                           │ (lookups)   │
//! └──────┬──────┘                           └──────┬──────┘
//!        └──────────────┬─────────────────────────┘
//!                       ▼
//!               ┌───────────────┐      ┌────────────┐
//!               │ TreeMutator   │ ───► │ Replica    │ ◄── ViewState
//!               │ rename/add/   │      │ (session   │     (expand flags)
//!               │ delete/move   │      │  state)    │
//!               └───────────────┘      └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`node`] — `TreeNode` value type, drop positions, well-formedness checks
//! - [`arena`] — slot storage addressed by `NodeKey`
//! - [`index`] — O(1) id → node and id → parent lookups
//! - [`mutator`] — structural operations with cycle prevention
//! - [`view`] — per-session expand/collapse state and visible rows
//! - [`replica`] — local tree + view state + remote merge rules

pub mod node;
pub mod arena;
pub mod index;
pub mod mutator;
pub mod view;
pub mod replica;

// Re-exports for convenience
pub use node::{Position, TreeError, TreeNode, MAX_DEPTH};
pub use arena::{NodeArena, NodeKey};
pub use index::TreeIndex;
pub use mutator::{MoveRejection, MutationError, TreeMutator};
pub use view::{ViewState, VisibleRow};
pub use replica::{Replica, RemoteOutcome};
