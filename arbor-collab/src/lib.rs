//! # arbor-collab — Real-time sharing of one label tree
//!
//! Every client edits a local copy and commits whole-tree snapshots; the server
//! persists each one as a new version and pushes it to everyone else.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐  POST /api/tree   ┌─────────────────────┐
//! │ ClientSyncSession │ ────────────────► │ SyncServer          │
//! │ (per user)        │  GET /api/tree    │  └─ SyncCoordinator │
//! │  └─ Replica       │ ◄──────────────── │      ├─ Snapshot-   │
//! └───────────────────┘                   │      │  Store       │
//!          ▲            WebSocket         │      └─ Broadcast-  │
//!          └──────── {"type":"treeUpdate"}│         Group       │
//!                                         └─────────────────────┘
//! ```
//!
//! Conflicts resolve as last writer wins: the most recently persisted
//! snapshot replaces every earlier one in full.
//!
//! ## Modules
//!
//! - [`protocol`] — JSON bodies and WebSocket frames
//! - [`broadcast`] — session registry and fan-out with echo suppression
//! - [`storage`] — append-only snapshot history (RocksDB or in-memory)
//! - [`coordinator`] — server-side authority: commit, latest, broadcast
//! - [`server`] — HTTP API and WebSocket listener
//! - [`api`] — request/response client (HTTP or in-process)
//! - [`session`] — client session state machine

pub mod protocol;
pub mod broadcast;
pub mod storage;
pub mod coordinator;
pub mod server;
pub mod api;
pub mod session;

// Re-exports for convenience
pub use protocol::{CommitRequest, CommitResponse, ErrorBody, ProtocolError, ServerMessage};
pub use broadcast::{BroadcastGroup, BroadcastStats, Subscription};
pub use storage::{
    MemorySnapshotStore, RocksSnapshotStore, SnapshotInfo, SnapshotStore, StoreConfig, StoreError,
    TreeSnapshot,
};
pub use coordinator::{default_tree, CommitError, SyncCoordinator};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use api::{ApiError, HttpTreeApi, LocalTreeApi, TreeApi};
pub use session::{ClientSyncSession, ReconnectPolicy, SessionConfig, SessionEvent, SessionState};
