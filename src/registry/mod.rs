//! Group registry
//!
//! Maps a session id to the set of connections currently attached to it. Groups are
//! sharded through a `DashMap`, so membership changes and broadcasts for one session never
//! wait on another session's traffic. All operations are in-memory and never suspend.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::metrics::HubMetrics;
use crate::protocol;
use crate::store::SessionId;

/// Process-unique connection identifier
pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Error types for a single delivery attempt
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue for connection {0} is full")]
    QueueFull(ConnId),
    #[error("connection {0} is closed")]
    Closed(ConnId),
}

/// Opaque handle to one client's outbound queue
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnId,
    tx: mpsc::Sender<Arc<str>>,
}

impl ConnectionHandle {
    /// Wrap an outbound queue in a handle with a fresh id
    pub fn new(tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    /// Create a handle together with the receiving end of its queue
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Queue a frame without waiting
    pub fn deliver(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull(self.id),
            TrySendError::Closed(_) => DeliveryError::Closed(self.id),
        })
    }

    /// Queue a frame, waiting for room if the queue is full
    pub async fn send(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| DeliveryError::Closed(self.id))
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// Members of one session
type Group = HashMap<ConnId, ConnectionHandle>;

/// Session id to connected members
pub struct GroupRegistry {
    groups: DashMap<SessionId, Group>,
    metrics: Arc<HubMetrics>,
}

impl GroupRegistry {
    pub fn new(metrics: Arc<HubMetrics>) -> Self {
        Self {
            groups: DashMap::new(),
            metrics,
        }
    }

    /// Add a connection to a session's group, creating the group if needed
    pub fn join(&self, session_id: SessionId, handle: ConnectionHandle) {
        let conn_id = handle.id();
        let mut group = self.groups.entry(session_id).or_default();
        if group.insert(conn_id, handle).is_none() {
            debug!(
                session_id,
                conn_id,
                members = group.len(),
                "connection joined group"
            );
        }
    }

    /// Remove a connection from a session's group; empty groups are dropped
    pub fn leave(&self, session_id: SessionId, conn_id: ConnId) {
        if let Entry::Occupied(mut entry) = self.groups.entry(session_id) {
            if entry.get_mut().remove(&conn_id).is_some() {
                debug!(session_id, conn_id, "connection left group");
            }
            if entry.get().is_empty() {
                entry.remove();
                debug!(session_id, "group removed");
            }
        }
    }

    /// Deliver a frame to every member except `exclude`
    ///
    /// The frame is serialized once. Membership is read under the shard lock, so a
    /// connection that has left never sees a later broadcast. A member whose queue is full
    /// or closed is skipped and logged. Returns the number of members reached.
    pub fn broadcast<T: Serialize + ?Sized>(
        &self,
        session_id: SessionId,
        frame: &T,
        exclude: Option<ConnId>,
    ) -> usize {
        let Some(text) = protocol::encode(frame) else {
            return 0;
        };
        self.broadcast_raw(session_id, text, exclude)
    }

    /// Deliver an already serialized frame, see [`GroupRegistry::broadcast`]
    pub fn broadcast_raw(
        &self,
        session_id: SessionId,
        text: Arc<str>,
        exclude: Option<ConnId>,
    ) -> usize {
        let mut delivered = 0;
        if let Some(group) = self.groups.get(&session_id) {
            for (conn_id, handle) in group.iter() {
                if Some(*conn_id) == exclude {
                    continue;
                }
                match handle.deliver(text.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!(session_id, conn_id, error = %e, "failed to deliver broadcast");
                        self.metrics.record_delivery_failure();
                    }
                }
            }
        }

        debug!(session_id, delivered, "broadcast to group");
        self.metrics.record_broadcast(delivered);
        delivered
    }

    /// Ids of the connections currently in a session's group
    pub fn members(&self, session_id: SessionId) -> Vec<ConnId> {
        self.groups
            .get(&session_id)
            .map(|group| group.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, session_id: SessionId) -> usize {
        self.groups
            .get(&session_id)
            .map(|group| group.len())
            .unwrap_or(0)
    }

    /// Number of sessions with at least one member
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> GroupRegistry {
        GroupRegistry::new(Arc::new(HubMetrics::new()))
    }

    #[test]
    fn test_join_is_idempotent() {
        let registry = registry();
        let (handle, _rx) = ConnectionHandle::channel(8);

        registry.join(1, handle.clone());
        registry.join(1, handle.clone());

        assert_eq!(registry.member_count(1), 1);
        assert_eq!(registry.members(1), vec![handle.id()]);
    }

    #[test]
    fn test_leave_twice_keeps_other_members() {
        let registry = registry();
        let (a, _rx_a) = ConnectionHandle::channel(8);
        let (b, mut rx_b) = ConnectionHandle::channel(8);
        registry.join(4, a.clone());
        registry.join(4, b.clone());

        registry.leave(4, a.id());
        registry.leave(4, a.id());

        assert_eq!(registry.members(4), vec![b.id()]);
        assert_eq!(registry.broadcast(4, &json!({"ping": 1}), None), 1);
        assert_eq!(&*rx_b.try_recv().unwrap(), r#"{"ping":1}"#);
    }

    #[test]
    fn test_empty_group_is_removed() {
        let registry = registry();
        let (handle, _rx) = ConnectionHandle::channel(8);
        registry.join(9, handle.clone());
        assert_eq!(registry.group_count(), 1);

        registry.leave(9, handle.id());
        assert_eq!(registry.group_count(), 0);
        registry.leave(9, handle.id());
    }

    #[test]
    fn test_broadcast_is_isolated_per_session() {
        let registry = registry();
        let (a, mut rx_a) = ConnectionHandle::channel(8);
        let (b, mut rx_b) = ConnectionHandle::channel(8);
        registry.join(7, a);
        registry.join(8, b);

        assert_eq!(registry.broadcast(7, &json!({"status": "started"}), None), 1);

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_excludes_origin() {
        let registry = registry();
        let (a, mut rx_a) = ConnectionHandle::channel(8);
        let (b, mut rx_b) = ConnectionHandle::channel(8);
        registry.join(2, a.clone());
        registry.join(2, b);

        assert_eq!(registry.broadcast(2, &json!({}), Some(a.id())), 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_failed_delivery_does_not_abort_broadcast() {
        let metrics = Arc::new(HubMetrics::new());
        let registry = GroupRegistry::new(metrics.clone());
        let (full, _rx_full) = ConnectionHandle::channel(1);
        let (closed, rx_closed) = ConnectionHandle::channel(8);
        let (healthy, mut rx_healthy) = ConnectionHandle::channel(8);
        drop(rx_closed);
        full.deliver(Arc::from("filler")).unwrap();

        registry.join(3, full);
        registry.join(3, closed);
        registry.join(3, healthy);

        assert_eq!(registry.broadcast(3, &json!({"n": 1}), None), 1);
        assert!(rx_healthy.try_recv().is_ok());
        assert_eq!(metrics.snapshot().delivery_failures, 2);
    }

    #[test]
    fn test_no_broadcast_after_leave() {
        let registry = registry();
        let (handle, mut rx) = ConnectionHandle::channel(8);
        registry.join(5, handle.clone());
        registry.leave(5, handle.id());

        assert_eq!(registry.broadcast(5, &json!({"late": true}), None), 0);
        assert!(rx.try_recv().is_err());
    }
}
