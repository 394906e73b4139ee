//! Client side of the sync protocol.
//!
//! A [`ClientSyncSession`] owns one [`Replica`] and drives it from two
//! directions:
//! ```text
//!   local edit ──► Replica (applied at once) ──► commit queue ──► TreeApi::commit
//!                      ▲                            (one worker, in order)
//!   subscription ──────┘ merge (last writer wins)
//! ```
//!
//! States: `Disconnected → Connecting → Synced`. A lost subscription moves
//! back to `Disconnected` and records an error; nothing reconnects on its own.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arbor_core::{MutationError, Position, RemoteOutcome, Replica, TreeNode, VisibleRow};
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::api::{HttpTreeApi, TreeApi};
use crate::protocol::{ProtocolError, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Synced,
}

/// Events emitted by a session for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A tree is known and the subscription is live
    Synced,
    /// A remote snapshot replaced the local tree
    RemoteUpdate,
    /// A local edit was persisted
    Committed { version_id: u64 },
    /// A local edit could not be persisted
    CommitFailed(String),
    /// The initial snapshot could not be fetched
    FetchFailed(String),
    /// The subscription dropped or the session was closed
    Disconnected,
}

/// Backoff schedule for [`ClientSyncSession::reconnect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// HTTP server root
    pub api_url: String,
    /// WebSocket server root; the session id is appended as the path
    pub ws_url: String,
    /// Events buffered for the UI before new ones are dropped
    pub event_capacity: usize,
    /// Snapshots waiting to be committed before edits start failing
    pub commit_queue: usize,
    /// Subscribe under the session id so the server skips this session's own
    /// commits. A commit racing a remote one can then leave this replica on
    /// the older snapshot until the next update arrives.
    pub suppress_echo: bool,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:3000".to_string(),
            ws_url: "ws://127.0.0.1:3001".to_string(),
            event_capacity: 256,
            commit_queue: 64,
            suppress_echo: false,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

struct Inner {
    replica: Replica,
    state: SessionState,
    last_error: Option<String>,
}

/// State shared with the reader and commit tasks.
struct Shared {
    inner: Mutex<Inner>,
    events: mpsc::Sender<SessionEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            log::debug!("Event queue full, dropping {event:?}");
        }
    }

    fn fail(&self, message: String, event: SessionEvent) {
        self.lock().last_error = Some(message);
        self.emit(event);
    }

    fn disconnect(&self, reason: Option<String>) {
        {
            let mut inner = self.lock();
            if inner.state == SessionState::Disconnected {
                return;
            }
            inner.state = SessionState::Disconnected;
            if reason.is_some() {
                inner.last_error = reason;
            }
        }
        self.emit(SessionEvent::Disconnected);
    }
}

/// One client's live view of the shared tree.
pub struct ClientSyncSession<A: TreeApi = HttpTreeApi> {
    session_id: Uuid,
    api: Arc<A>,
    config: SessionConfig,
    shared: Arc<Shared>,
    commit_tx: mpsc::Sender<TreeNode>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl ClientSyncSession<HttpTreeApi> {
    /// Connect to a running server: subscribe over WebSocket, then fetch the
    /// current tree over HTTP.
    ///
    /// Always returns a session; check [`state`](Self::state) and
    /// [`last_error`](Self::last_error) to see whether it synced.
    pub async fn start(config: SessionConfig) -> Self {
        let api = HttpTreeApi::new(&config.api_url);
        let mut session = Self::new(api, Uuid::new_v4(), config);
        session.connect().await;
        session
    }
}

impl<A: TreeApi> ClientSyncSession<A> {
    /// A disconnected session with its commit worker running.
    pub fn new(api: A, session_id: Uuid, config: SessionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (commit_tx, commit_rx) = mpsc::channel(config.commit_queue.max(1));
        let api = Arc::new(api);
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                replica: Replica::new(),
                state: SessionState::Disconnected,
                last_error: None,
            }),
            events: event_tx,
        });
        // Drains what is queued, then stops once the session drops its sender
        tokio::spawn(commit_worker(api.clone(), session_id, shared.clone(), commit_rx));

        Self {
            session_id,
            api,
            config,
            shared,
            commit_tx,
            event_rx: Some(event_rx),
            reader: None,
        }
    }

    /// Start with an injected update stream instead of a WebSocket.
    ///
    /// `updates` must already be subscribed under `session_id` for echo
    /// suppression to apply.
    pub async fn start_with<S>(api: A, session_id: Uuid, updates: S, config: SessionConfig) -> Self
    where
        S: Stream<Item = TreeNode> + Send + 'static,
    {
        let mut session = Self::new(api, session_id, config);
        session.sync_with(updates.boxed()).await;
        session
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// User-visible error from the last failed fetch, commit, or transport
    /// drop. Cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    /// Open the WebSocket subscription and sync. Returns whether the session
    /// reached `Synced`.
    async fn connect(&mut self) -> bool {
        self.stop_reader();
        self.shared.lock().state = SessionState::Connecting;

        let as_session = self.config.suppress_echo.then_some(self.session_id);
        match subscribe(&self.config.ws_url, as_session).await {
            Ok(updates) => self.sync_with(updates).await,
            Err(e) => {
                log::warn!("Session {} could not subscribe: {e}", self.session_id);
                self.shared.disconnect(Some(e.to_string()));
                false
            }
        }
    }

    /// Attach `updates` as the subscription, then fetch the latest tree.
    async fn sync_with(&mut self, updates: BoxStream<'static, TreeNode>) -> bool {
        self.stop_reader();
        {
            let mut inner = self.shared.lock();
            inner.state = SessionState::Connecting;
            inner.replica.begin_sync();
        }
        self.reader = Some(tokio::spawn(read_updates(updates, self.shared.clone())));

        match self.api.fetch_latest().await {
            Ok(tree) => {
                let became_synced = {
                    let mut inner = self.shared.lock();
                    let adopted = inner.replica.adopt_fetched(&tree);
                    match adopted {
                        Ok(RemoteOutcome::Superseded) => {
                            log::debug!("Fetched tree superseded by a broadcast");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            drop(inner);
                            log::warn!("Fetched tree rejected: {e}");
                            self.shared.fail(e.to_string(), SessionEvent::FetchFailed(e.to_string()));
                            return false;
                        }
                    }
                    inner.last_error = None;
                    let connecting = inner.state == SessionState::Connecting;
                    if connecting {
                        inner.state = SessionState::Synced;
                    }
                    connecting
                };
                if became_synced {
                    log::info!("Session {} synced", self.session_id);
                    self.shared.emit(SessionEvent::Synced);
                }
                self.state() == SessionState::Synced
            }
            Err(e) => {
                log::error!("Session {} failed to fetch tree: {e}", self.session_id);
                self.shared.fail(e.to_string(), SessionEvent::FetchFailed(e.to_string()));
                false
            }
        }
    }

    /// Re-run the start sequence against the configured WebSocket URL,
    /// backing off between attempts per [`ReconnectPolicy`].
    pub async fn reconnect(&mut self) -> bool {
        let policy = self.config.reconnect.clone();
        for attempt in 0..policy.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(policy.backoff(attempt - 1)).await;
            }
            if self.connect().await {
                return true;
            }
            log::warn!(
                "Session {} reconnect attempt {}/{} failed",
                self.session_id,
                attempt + 1,
                policy.max_attempts
            );
        }
        false
    }

    /// Like [`reconnect`](Self::reconnect) with an injected update stream.
    pub async fn reconnect_with<S>(&mut self, updates: S) -> bool
    where
        S: Stream<Item = TreeNode> + Send + 'static,
    {
        self.sync_with(updates.boxed()).await
    }

    /// Drop the subscription and move to `Disconnected`. Queued commits are
    /// still sent.
    pub fn close(&mut self) {
        self.stop_reader();
        self.shared.disconnect(None);
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    // ─── Local edits ──────────────────────────────────────────────────
    //
    // Applied to the replica at once; the resulting snapshot is queued for
    // commit. A rejected edit is a logged no-op and returns false.

    pub fn rename(&self, id: &str, label: impl Into<String>) -> bool {
        self.mutate("rename", |r| r.rename(id, label))
    }

    pub fn add(&self, parent_id: &str, node: TreeNode) -> bool {
        self.mutate("add", |r| r.add(parent_id, node))
    }

    /// Add a fresh leaf under `parent_id`; returns its generated id.
    pub fn add_leaf(&self, parent_id: &str, label: impl Into<String>) -> Option<String> {
        let node = TreeNode::leaf(label);
        let id = node.id.clone();
        self.add(parent_id, node).then_some(id)
    }

    pub fn delete(&self, id: &str) -> bool {
        self.mutate("delete", |r| r.delete(id))
    }

    pub fn move_node(&self, source_id: &str, target_id: &str, position: Position) -> bool {
        self.mutate("move", |r| r.move_node(source_id, target_id, position))
    }

    fn mutate(&self, op: &str, f: impl FnOnce(&mut Replica) -> Result<TreeNode, MutationError>) -> bool {
        let mut inner = self.shared.lock();
        let snapshot = match f(&mut inner.replica) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::debug!("{op} ignored: {e}");
                return false;
            }
        };
        // Queued under the lock so commit order matches edit order
        if let Err(e) = self.commit_tx.try_send(snapshot) {
            let message = match e {
                TrySendError::Full(_) => "Commit queue full".to_string(),
                TrySendError::Closed(_) => "Commit worker stopped".to_string(),
            };
            log::error!("Session {}: {message}", self.session_id);
            inner.last_error = Some(message.clone());
            drop(inner);
            self.shared.emit(SessionEvent::CommitFailed(message));
        }
        true
    }

    // ─── View state ───────────────────────────────────────────────────

    /// Flip expand/collapse for `id`; returns the new state. Never committed.
    pub fn toggle_expanded(&self, id: &str) -> bool {
        self.shared.lock().replica.toggle_expanded(id)
    }

    pub fn set_expanded(&self, id: &str, expanded: bool) {
        self.shared.lock().replica.set_expanded(id, expanded);
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.shared.lock().replica.view().is_expanded(id)
    }

    pub fn visible_rows(&self) -> Vec<VisibleRow> {
        self.shared.lock().replica.visible_rows()
    }

    /// Current local tree, if one has been adopted.
    pub fn tree(&self) -> Option<TreeNode> {
        self.shared.lock().replica.snapshot()
    }
}

impl<A: TreeApi> Drop for ClientSyncSession<A> {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

/// Post queued snapshots one at a time.
async fn commit_worker<A: TreeApi>(
    api: Arc<A>,
    session_id: Uuid,
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<TreeNode>,
) {
    while let Some(tree) = rx.recv().await {
        match api.commit(tree, session_id).await {
            Ok(version_id) => {
                log::debug!("Session {session_id} committed v{version_id}");
                shared.lock().last_error = None;
                shared.emit(SessionEvent::Committed { version_id });
            }
            Err(e) => {
                log::error!("Session {session_id} commit failed: {e}");
                shared.fail(e.to_string(), SessionEvent::CommitFailed(e.to_string()));
            }
        }
    }
}

/// Merge every received tree; on end of stream the session is disconnected.
async fn read_updates(mut updates: BoxStream<'static, TreeNode>, shared: Arc<Shared>) {
    while let Some(tree) = updates.next().await {
        let (outcome, became_synced) = {
            let mut inner = shared.lock();
            let outcome = inner.replica.apply_remote(&tree);
            let became_synced = outcome.is_ok() && inner.state == SessionState::Connecting;
            if became_synced {
                inner.state = SessionState::Synced;
            }
            (outcome, became_synced)
        };

        match outcome {
            Ok(RemoteOutcome::Applied { discarded_view_entries }) => {
                log::debug!("Applied remote tree ({discarded_view_entries} view entries dropped)");
                shared.emit(SessionEvent::RemoteUpdate);
            }
            Ok(_) => log::debug!("Remote tree matches local tree"),
            Err(e) => log::warn!("Rejected malformed remote tree: {e}"),
        }
        if became_synced {
            shared.emit(SessionEvent::Synced);
        }
    }
    shared.disconnect(Some("Connection to server lost".to_string()));
}

/// Connect to `ws_url` (or `ws_url/<session_id>`) and decode `treeUpdate` frames.
async fn subscribe(
    ws_url: &str,
    session_id: Option<Uuid>,
) -> Result<BoxStream<'static, TreeNode>, ProtocolError> {
    let root = ws_url.trim_end_matches('/');
    let url = match session_id {
        Some(id) => format!("{root}/{id}"),
        None => format!("{root}/"),
    };
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| ProtocolError::ConnectionFailed(e.to_string()))?;
    log::info!("Subscribed to {url}");

    Ok(stream::unfold(ws, |mut ws| async move {
        loop {
            match ws.next().await? {
                Ok(Message::Text(text)) => match ServerMessage::decode(&text) {
                    Ok(ServerMessage::TreeUpdate(tree)) => return Some((tree, ws)),
                    Err(e) => log::debug!("Ignoring frame: {e}"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Subscription error: {e}");
                    return None;
                }
            }
        }
    })
    .boxed())
}
