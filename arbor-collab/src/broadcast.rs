//! Fan-out of committed snapshots to every subscribed session.
//!
//! One tokio broadcast channel carries pre-encoded frames; each session gets an
//! independent receiver. Frames are tagged with the committing session so a
//! [`Subscription`] can skip its own echo without the sender tracking peers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arbor_core::TreeNode;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, ServerMessage};

/// One encoded frame on the channel.
#[derive(Debug)]
pub struct Outbound {
    /// Session whose commit produced this frame
    pub origin: Option<Uuid>,
    /// JSON text frame
    pub payload: String,
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_lagged: u64,
    pub active_sessions: usize,
}

#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_lagged: AtomicU64,
}

/// Registered subscriber.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub connected_at: Instant,
}

/// Registry of live sessions plus the shared channel.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Outbound>>,
    sessions: RwLock<HashMap<Uuid, SessionInfo>>,
    capacity: usize,
    stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` frames are buffered per receiver before it starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sessions: RwLock::new(HashMap::new()),
            capacity,
            stats: Arc::new(AtomicBroadcastStats::default()),
        }
    }

    /// Add a session and return its subscription.
    ///
    /// The receiver is created under the registry lock, so a frame sent after
    /// `register` returns is always delivered to it.
    pub async fn register(&self, session_id: Uuid) -> Subscription {
        let mut sessions = self.sessions.write().await;
        let receiver = self.sender.subscribe();
        sessions.insert(
            session_id,
            SessionInfo {
                session_id,
                connected_at: Instant::now(),
            },
        );
        log::debug!("Session {session_id} registered ({} active)", sessions.len());
        Subscription {
            session_id,
            receiver,
            stats: self.stats.clone(),
        }
    }

    /// Remove a session. Dropping its [`Subscription`] releases the receiver.
    pub async fn deregister(&self, session_id: &Uuid) -> Option<SessionInfo> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            log::debug!("Session {session_id} deregistered");
        }
        removed
    }

    /// Send `tree` as a `treeUpdate` frame to every session except `origin`.
    ///
    /// Returns the number of receivers the frame was queued for (the origin's
    /// own receiver included; it discards the frame on receipt).
    pub fn broadcast(&self, tree: &TreeNode, origin: Option<Uuid>) -> Result<usize, ProtocolError> {
        let payload = ServerMessage::TreeUpdate(tree.clone()).encode()?;
        Ok(self.broadcast_raw(Arc::new(Outbound { origin, payload })))
    }

    /// Send an already encoded frame.
    pub fn broadcast_raw(&self, frame: Arc<Outbound>) -> usize {
        let count = self.sender.send(frame).unwrap_or(0);
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn has_session(&self, session_id: &Uuid) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_lagged: self.stats.messages_lagged.load(Ordering::Relaxed),
            active_sessions: self.sessions.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A session's view of the channel.
pub struct Subscription {
    session_id: Uuid,
    receiver: broadcast::Receiver<Arc<Outbound>>,
    stats: Arc<AtomicBroadcastStats>,
}

impl Subscription {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Next frame not originated by this session.
    ///
    /// A lagging receiver skips the overwritten frames and keeps going: the
    /// next frame it does receive is a full snapshot, so nothing is lost but
    /// intermediate versions. Returns `None` once the group is dropped.
    pub async fn recv(&mut self) -> Option<Arc<Outbound>> {
        loop {
            match self.receiver.recv().await {
                Ok(frame) if frame.origin == Some(self.session_id) => continue,
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.stats.messages_lagged.fetch_add(n, Ordering::Relaxed);
                    log::warn!("Session {} lagged, skipped {n} updates", self.session_id);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tree(label: &str) -> TreeNode {
        TreeNode::new("1", label)
    }

    #[tokio::test]
    async fn test_register_deregister() {
        let group = BroadcastGroup::new(16);
        let id = Uuid::new_v4();

        let sub = group.register(id).await;
        assert_eq!(sub.session_id(), id);
        assert!(group.has_session(&id).await);
        assert_eq!(group.session_count().await, 1);

        assert!(group.deregister(&id).await.is_some());
        assert!(group.deregister(&id).await.is_none());
        assert_eq!(group.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_fan_out_skips_origin() {
        let group = BroadcastGroup::new(16);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut sub_a = group.register(alice).await;
        let mut sub_b = group.register(bob).await;

        let queued = group.broadcast(&tree("from alice"), Some(alice)).unwrap();
        assert_eq!(queued, 2);

        let frame = sub_b.recv().await.unwrap();
        assert_eq!(frame.origin, Some(alice));
        let ServerMessage::TreeUpdate(t) = ServerMessage::decode(&frame.payload).unwrap();
        assert_eq!(t.label, "from alice");

        // Alice only sees the next frame that is not her own
        group.broadcast(&tree("from bob"), Some(bob)).unwrap();
        let frame = sub_a.recv().await.unwrap();
        assert_eq!(frame.origin, Some(bob));
    }

    #[tokio::test]
    async fn test_anonymous_commit_reaches_everyone() {
        let group = BroadcastGroup::new(16);
        let mut sub = group.register(Uuid::new_v4()).await;
        group.broadcast(&tree("x"), None).unwrap();
        assert!(sub.recv().await.unwrap().origin.is_none());
    }

    #[tokio::test]
    async fn test_no_subscribers_is_not_an_error() {
        let group = BroadcastGroup::new(4);
        assert_eq!(group.broadcast(&tree("x"), None).unwrap(), 0);
        assert_eq!(group.stats().await.messages_sent, 1);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_gets_newest() {
        let group = BroadcastGroup::new(2);
        let mut sub = group.register(Uuid::new_v4()).await;
        for i in 0..5 {
            group.broadcast(&tree(&format!("v{i}")), None).unwrap();
        }

        let mut last = None;
        while let Ok(Some(frame)) =
            tokio::time::timeout(Duration::from_millis(50), sub.recv()).await
        {
            last = Some(frame);
        }
        let ServerMessage::TreeUpdate(t) = ServerMessage::decode(&last.unwrap().payload).unwrap();
        assert_eq!(t.label, "v4");
        assert!(group.stats().await.messages_lagged > 0);
    }

    #[tokio::test]
    async fn test_stats_and_capacity() {
        let group = BroadcastGroup::new(32);
        let _sub = group.register(Uuid::new_v4()).await;
        group.broadcast(&tree("a"), None).unwrap();
        group.broadcast(&tree("b"), None).unwrap();

        let stats = group.stats().await;
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(group.capacity(), 32);
    }
}
