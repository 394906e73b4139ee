//! JSON wire protocol shared by the server and client sessions.
//!
//! Two channels carry tree state:
//! ```text
//! request/response (HTTP)                 publish/subscribe (WebSocket)
//! ┌──────────────────────────────┐        ┌──────────────────────────────────┐
//! │ GET  /api/tree → TreeNode    │        │ server → client only             │
//! │ POST /api/tree               │        │ {"type":"treeUpdate",            │
//! │   {"tree_data": TreeNode}    │        │  "data": TreeNode}               │
//! │   → {"version_id","message"} │        │                                  │
//! │ errors → {"error": string}   │        │ path: /<session uuid> (optional) │
//! └──────────────────────────────┘        └──────────────────────────────────┘
//! ```
//!
//! A client that tags its commits with [`SESSION_HEADER`] and subscribes under
//! the same UUID does not receive its own updates back.

use arbor_core::TreeNode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// HTTP route for snapshot fetch and commit.
pub const TREE_ROUTE: &str = "/api/tree";

/// Header naming the committing session, used to suppress the echo.
pub const SESSION_HEADER: &str = "x-arbor-session";

/// Success message returned with every commit.
pub const COMMIT_MESSAGE: &str = "Tree saved successfully";

/// `GET /api/tree` storage failure.
pub const FETCH_FAILED: &str = "Failed to fetch tree data";

/// `POST /api/tree` storage failure.
pub const SAVE_FAILED: &str = "Failed to save tree data";

/// Server → client frames on the subscribe channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// A newly committed snapshot
    TreeUpdate(TreeNode),
}

impl ServerMessage {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// `POST /api/tree` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub tree_data: TreeNode,
}

/// `POST /api/tree` success body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub version_id: u64,
    pub message: String,
}

impl CommitResponse {
    pub fn new(version_id: u64) -> Self {
        Self {
            version_id,
            message: COMMIT_MESSAGE.to_string(),
        }
    }
}

/// Error body for any failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

/// Extract a session id from a WebSocket request path such as `/3f2a…`.
pub fn session_id_from_path(path: &str) -> Option<Uuid> {
    let segment = path.trim_matches('/').rsplit('/').next()?;
    Uuid::parse_str(segment).ok()
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionFailed(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionFailed(e) => write!(f, "Connection failed: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> TreeNode {
        TreeNode::new("1", "Root").with_child(TreeNode::new("2", "A"))
    }

    #[test]
    fn test_tree_update_wire_shape() {
        let text = ServerMessage::TreeUpdate(tree()).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "treeUpdate");
        assert_eq!(value["data"]["id"], "1");
        assert_eq!(value["data"]["children"][0]["label"], "A");
    }

    #[test]
    fn test_decode_tree_update() {
        let text = r#"{"type":"treeUpdate","data":{"id":"1","label":"Root","children":[]}}"#;
        let ServerMessage::TreeUpdate(t) = ServerMessage::decode(text).unwrap();
        assert_eq!(t, TreeNode::new("1", "Root"));
    }

    #[test]
    fn test_decode_rejects_unknown_type_and_garbage() {
        assert!(ServerMessage::decode(r#"{"type":"cursor","data":{}}"#).is_err());
        assert!(ServerMessage::decode("not json").is_err());
    }

    #[test]
    fn test_commit_bodies() {
        let req: CommitRequest =
            serde_json::from_str(r#"{"tree_data":{"id":"1","label":"Root","children":[]}}"#).unwrap();
        assert_eq!(req.tree_data.id, "1");

        let resp = serde_json::to_value(CommitResponse::new(7)).unwrap();
        assert_eq!(resp, serde_json::json!({"version_id": 7, "message": "Tree saved successfully"}));

        let err = serde_json::to_value(ErrorBody::new("Failed to save tree data")).unwrap();
        assert_eq!(err, serde_json::json!({"error": "Failed to save tree data"}));
    }

    #[test]
    fn test_session_id_from_path() {
        let id = Uuid::new_v4();
        assert_eq!(session_id_from_path(&format!("/{id}")), Some(id));
        assert_eq!(session_id_from_path(&format!("/ws/{id}/")), Some(id));
        assert_eq!(session_id_from_path("/"), None);
        assert_eq!(session_id_from_path("/not-a-uuid"), None);
    }

    #[test]
    fn test_protocol_error_display() {
        assert_eq!(ProtocolError::ConnectionClosed.to_string(), "Connection closed");
        assert!(ProtocolError::DeserializationError("x".into())
            .to_string()
            .contains("Deserialization"));
    }
}
