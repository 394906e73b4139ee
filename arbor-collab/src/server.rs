//! HTTP + WebSocket front end for a [`SyncCoordinator`].
//!
//! Architecture:
//! ```text
//!                 GET/POST /api/tree            ┌──────────────────┐
//! Client A ──────────────────────────────────►  │ HTTP worker      │
//!    ▲                                          │ (one request at  │
//!    │                                          │  a time)         │
//!    │                                          └────────┬─────────┘
//!    │                                                   │ commit / latest
//!    │                                                   ▼
//!    │        {"type":"treeUpdate"}          ┌──────────────────────┐
//!    └──────────────── WS task ◄──────────── │ SyncCoordinator      │
//! Client B ◄────────── WS task ◄──────────── │  ├── SnapshotStore   │
//!                                            │  └── BroadcastGroup  │
//!                                            └──────────────────────┘
//! ```
//!
//! The WebSocket channel is server → client only; anything a client sends
//! besides pings and close frames is ignored.

use std::error::Error;
use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tiny_http::{Header, Method};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::broadcast::Subscription;
use crate::coordinator::{CommitError, SyncCoordinator};
use crate::protocol::{
    session_id_from_path, CommitRequest, CommitResponse, ErrorBody, FETCH_FAILED, SAVE_FAILED,
    SESSION_HEADER, TREE_ROUTE,
};
use crate::storage::{MemorySnapshotStore, RocksSnapshotStore, SnapshotStore, StoreConfig, StoreError};

type BoxError = Box<dyn Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// HTTP API address
    pub http_addr: String,
    /// WebSocket address
    pub ws_addr: String,
    /// Frames buffered per subscriber before it lags
    pub broadcast_capacity: usize,
    /// Snapshot store path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 3000;
const DEFAULT_WS_PORT: u16 = 3001;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: format!("{DEFAULT_HOST}:{DEFAULT_HTTP_PORT}"),
            ws_addr: format!("{DEFAULT_HOST}:{DEFAULT_WS_PORT}"),
            broadcast_capacity: 256,
            storage_path: None,
        }
    }
}

impl ServerConfig {
    /// Read `PORT`, `WS_PORT`, `ARBOR_BIND_HOST`, `ARBOR_STORAGE_PATH` and
    /// `ARBOR_BROADCAST_CAPACITY`. Unset or unparseable values keep defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> T {
            match raw {
                Some(v) => v.trim().parse().unwrap_or_else(|_| {
                    log::warn!("Ignoring invalid {key}={v}");
                    default
                }),
                None => default,
            }
        }

        let defaults = Self::default();
        let host = lookup("ARBOR_BIND_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let http_port = parsed("PORT", lookup("PORT"), DEFAULT_HTTP_PORT);
        let ws_port = parsed("WS_PORT", lookup("WS_PORT"), DEFAULT_WS_PORT);
        Self {
            http_addr: format!("{host}:{http_port}"),
            ws_addr: format!("{host}:{ws_port}"),
            broadcast_capacity: parsed(
                "ARBOR_BROADCAST_CAPACITY",
                lookup("ARBOR_BROADCAST_CAPACITY"),
                defaults.broadcast_capacity,
            ),
            storage_path: lookup("ARBOR_STORAGE_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub http_requests: u64,
    pub commits: u64,
    pub broadcast_frames: u64,
}

#[derive(Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    http_requests: AtomicU64,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    coordinator: Arc<SyncCoordinator>,
    counters: Arc<Counters>,
}

impl SyncServer {
    /// Open the configured store and build the server.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn SnapshotStore> = match &config.storage_path {
            Some(path) => Arc::new(RocksSnapshotStore::open(StoreConfig::at(path))?),
            None => {
                log::info!("No storage path configured, history is kept in memory");
                Arc::new(MemorySnapshotStore::new())
            }
        };
        Ok(Self::with_store(config, store))
    }

    /// Build the server around an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let coordinator = Arc::new(SyncCoordinator::new(store, config.broadcast_capacity));
        Self {
            config,
            coordinator,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            http_requests: self.counters.http_requests.load(Ordering::Relaxed),
            commits: self.coordinator.commit_count(),
            broadcast_frames: self.coordinator.broadcast_stats().await.messages_sent,
        }
    }

    /// Serve HTTP and WebSocket until either listener fails.
    ///
    /// Dropping the returned future stops the HTTP worker as well.
    pub async fn run(&self) -> Result<(), BoxError> {
        let http = Arc::new(tiny_http::Server::http(&self.config.http_addr)?);
        let _unblock = UnblockOnDrop(http.clone());
        let ws = TcpListener::bind(&self.config.ws_addr).await?;
        log::info!("HTTP API listening on {}", self.config.http_addr);
        log::info!("WebSocket server listening on {}", self.config.ws_addr);

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        {
            let http = http.clone();
            let coordinator = self.coordinator.clone();
            let counters = self.counters.clone();
            let runtime = Handle::current();
            std::thread::Builder::new()
                .name("arbor-http".into())
                .spawn(move || {
                    serve_http(&http, &coordinator, &counters, &runtime);
                    let _ = done_tx.send(());
                })?;
        }

        tokio::select! {
            _ = done_rx => Err("HTTP server stopped".into()),
            r = accept_loop(ws, self.coordinator.clone(), self.counters.clone()) => r,
        }
    }
}

struct UnblockOnDrop(Arc<tiny_http::Server>);

impl Drop for UnblockOnDrop {
    fn drop(&mut self) {
        self.0.unblock();
    }
}

// ─── HTTP ─────────────────────────────────────────────────────────────

/// Status code and JSON body for one API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiReply {
    pub status: u16,
    pub body: String,
}

impl ApiReply {
    fn json(status: u16, value: &impl Serialize) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, body },
            Err(e) => {
                log::error!("Failed to encode response: {e}");
                Self {
                    status: 500,
                    body: r#"{"error":"internal error"}"#.to_string(),
                }
            }
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, &ErrorBody::new(message))
    }

    fn into_response(self) -> tiny_http::Response<Cursor<Vec<u8>>> {
        let headers = [
            ("Content-Type", "application/json"),
            ("Access-Control-Allow-Origin", "*"),
            ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
            (
                "Access-Control-Allow-Headers",
                "Origin, X-Requested-With, Content-Type, Accept, x-arbor-session",
            ),
        ];
        headers.iter().fold(
            tiny_http::Response::from_string(self.body).with_status_code(self.status),
            |response, (name, value)| match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                Ok(header) => response.with_header(header),
                Err(()) => response,
            },
        )
    }
}

/// Route one request. `path` has any query string already stripped.
pub async fn handle_api(
    coordinator: &SyncCoordinator,
    method: &Method,
    path: &str,
    session: Option<Uuid>,
    body: &str,
) -> ApiReply {
    if *method == Method::Options {
        return ApiReply { status: 200, body: String::new() };
    }
    if path.trim_end_matches('/') != TREE_ROUTE {
        return ApiReply::error(404, "Not found");
    }

    match method {
        Method::Get => match coordinator.latest().await {
            Ok(snapshot) => ApiReply::json(200, &snapshot.tree),
            Err(e) => {
                log::error!("Error fetching tree: {e}");
                ApiReply::error(500, FETCH_FAILED)
            }
        },
        Method::Post => {
            let request: CommitRequest = match serde_json::from_str(body) {
                Ok(r) => r,
                Err(e) => return ApiReply::error(400, format!("Invalid request body: {e}")),
            };
            match coordinator.commit(request.tree_data, session).await {
                Ok(version_id) => ApiReply::json(200, &CommitResponse::new(version_id)),
                Err(CommitError::Invalid(e)) => ApiReply::error(400, e.to_string()),
                Err(CommitError::Persistence(e)) => {
                    log::error!("Error saving tree: {e}");
                    ApiReply::error(500, SAVE_FAILED)
                }
            }
        }
        _ => ApiReply::error(405, "Method not allowed"),
    }
}

fn session_header(request: &tiny_http::Request) -> Option<Uuid> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(SESSION_HEADER))
        .and_then(|h| Uuid::parse_str(h.value.as_str().trim()).ok())
}

/// Blocking request loop; returns once the server is unblocked.
fn serve_http(server: &tiny_http::Server, coordinator: &SyncCoordinator, counters: &Counters, runtime: &Handle) {
    for mut request in server.incoming_requests() {
        counters.http_requests.fetch_add(1, Ordering::Relaxed);
        log::debug!("{} {}", request.method(), request.url());

        let mut body = String::new();
        let reply = match request.as_reader().read_to_string(&mut body) {
            Ok(_) => {
                let path = request.url().split('?').next().unwrap_or_default().to_string();
                let session = session_header(&request);
                runtime.block_on(handle_api(coordinator, request.method(), &path, session, &body))
            }
            Err(e) => ApiReply::error(400, format!("Unreadable request body: {e}")),
        };

        if let Err(e) = request.respond(reply.into_response()) {
            log::warn!("Failed to send HTTP response: {e}");
        }
    }
    log::info!("HTTP server stopped");
}

// ─── WebSocket ────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    coordinator: Arc<SyncCoordinator>,
    counters: Arc<Counters>,
) -> Result<(), BoxError> {
    loop {
        let (stream, addr) = listener.accept().await?;
        log::debug!("New TCP connection from {addr}");

        let coordinator = coordinator.clone();
        let counters = counters.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, coordinator, counters).await {
                log::warn!("Connection error from {addr}: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    coordinator: Arc<SyncCoordinator>,
    counters: Arc<Counters>,
) -> Result<(), BoxError> {
    let mut path = String::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            path = req.uri().path().to_string();
            Ok(resp)
        },
    )
    .await?;

    let session_id = session_id_from_path(&path).unwrap_or_else(Uuid::new_v4);
    let subscription = coordinator.register(session_id).await;
    counters.total_connections.fetch_add(1, Ordering::Relaxed);
    counters.active_connections.fetch_add(1, Ordering::Relaxed);
    log::info!("Session {session_id} connected from {addr}");

    let result = forward_updates(ws_stream, subscription).await;

    // Deregister before anything else can be queued for this session
    coordinator.deregister(&session_id).await;
    counters.active_connections.fetch_sub(1, Ordering::Relaxed);
    log::info!("Session {session_id} disconnected");
    result
}

/// Push broadcast frames to the socket until either side goes away.
async fn forward_updates(
    ws_stream: WebSocketStream<TcpStream>,
    mut subscription: Subscription,
) -> Result<(), BoxError> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Ping(data))) => ws_sender.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                    log::debug!("Ignoring client frame on session {}", subscription.session_id());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },

            frame = subscription.recv() => match frame {
                Some(frame) => ws_sender.send(Message::Text(frame.payload.clone().into())).await?,
                None => break,
            },
        }
    }
    Ok(())
}
