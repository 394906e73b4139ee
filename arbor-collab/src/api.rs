//! Request/response channel used by client sessions.
//!
//! [`TreeApi`] is the seam between a session and the server:
//! - [`HttpTreeApi`] talks to a running server over HTTP
//! - [`LocalTreeApi`] calls a [`SyncCoordinator`] in the same process

use std::future::Future;
use std::sync::Arc;

use arbor_core::TreeNode;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use uuid::Uuid;

use crate::coordinator::{CommitError, SyncCoordinator};
use crate::protocol::{CommitRequest, CommitResponse, ErrorBody, ServerMessage, SESSION_HEADER, TREE_ROUTE};

/// Fetch and commit whole-tree snapshots.
pub trait TreeApi: Send + Sync + 'static {
    /// Newest snapshot (or the server's default tree).
    fn fetch_latest(&self) -> impl Future<Output = Result<TreeNode, ApiError>> + Send;

    /// Persist `tree`; `session` is excluded from the resulting broadcast.
    fn commit(&self, tree: TreeNode, session: Uuid) -> impl Future<Output = Result<u64, ApiError>> + Send;
}

/// Request/response failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Request never got a response
    Transport(String),
    /// Server answered with an error status
    Server { status: u16, message: String },
    /// Response body could not be parsed
    Decode(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Transport(e) => write!(f, "Request failed: {e}"),
            ApiError::Server { status, message } => write!(f, "{message} (HTTP {status})"),
            ApiError::Decode(e) => write!(f, "Malformed response: {e}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<CommitError> for ApiError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::Invalid(e) => ApiError::Server {
                status: 400,
                message: e.to_string(),
            },
            CommitError::Persistence(e) => ApiError::Server {
                status: 500,
                message: e.to_string(),
            },
        }
    }
}

// ─── HTTP ─────────────────────────────────────────────────────────────

/// [`TreeApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTreeApi {
    client: reqwest::Client,
    url: String,
}

impl HttpTreeApi {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}{TREE_ROUTE}", base_url.trim_end_matches('/')),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Turn a non-success response into [`ApiError::Server`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("error").to_string(),
    };
    Err(ApiError::Server {
        status: status.as_u16(),
        message,
    })
}

impl TreeApi for HttpTreeApi {
    async fn fetch_latest(&self) -> Result<TreeNode, ApiError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        check_status(response)
            .await?
            .json::<TreeNode>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn commit(&self, tree: TreeNode, session: Uuid) -> Result<u64, ApiError> {
        let response = self
            .client
            .post(&self.url)
            .header(SESSION_HEADER, session.to_string())
            .json(&CommitRequest { tree_data: tree })
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let body = check_status(response)
            .await?
            .json::<CommitResponse>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(body.version_id)
    }
}

// ─── In-process ───────────────────────────────────────────────────────

/// [`TreeApi`] that calls a coordinator directly.
#[derive(Clone)]
pub struct LocalTreeApi {
    coordinator: Arc<SyncCoordinator>,
}

impl LocalTreeApi {
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Register `session_id` and yield every tree broadcast to it.
    ///
    /// The stream ends when the coordinator is dropped.
    pub async fn subscribe(&self, session_id: Uuid) -> BoxStream<'static, TreeNode> {
        let subscription = self.coordinator.register(session_id).await;
        stream::unfold(subscription, |mut sub| async move {
            loop {
                let frame = sub.recv().await?;
                match ServerMessage::decode(&frame.payload) {
                    Ok(ServerMessage::TreeUpdate(tree)) => return Some((tree, sub)),
                    Err(e) => log::debug!("Skipping frame: {e}"),
                }
            }
        })
        .boxed()
    }
}

impl TreeApi for LocalTreeApi {
    async fn fetch_latest(&self) -> Result<TreeNode, ApiError> {
        self.coordinator
            .latest()
            .await
            .map(|snapshot| snapshot.tree)
            .map_err(|e| ApiError::Server {
                status: 500,
                message: e.to_string(),
            })
    }

    async fn commit(&self, tree: TreeNode, session: Uuid) -> Result<u64, ApiError> {
        Ok(self.coordinator.commit(tree, Some(session)).await?)
    }
}
