//! Session Channel: serialized lifecycle transitions for live sessions

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::metrics::HubMetrics;
use crate::protocol::{Action, Notification, Reply};
use crate::registry::GroupRegistry;
use crate::store::{LifecycleState, Session, SessionId, SessionStore, StoreError};

/// Error types for lifecycle operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("Session {0} not found")]
    NotFound(SessionId),
    #[error("Cannot {action} session while it is {state}")]
    InvalidTransition {
        action: Action,
        state: LifecycleState,
    },
    #[error("Failed to persist session {session_id}: {reason}")]
    Persistence {
        session_id: SessionId,
        reason: String,
    },
    #[error("{0} is not a lifecycle action")]
    NotLifecycle(Action),
}

impl ChannelError {
    fn from_store(session_id: SessionId, error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => ChannelError::NotFound(id),
            StoreError::Persistence(reason) => ChannelError::Persistence { session_id, reason },
        }
    }
}

impl From<ChannelError> for Reply {
    fn from(error: ChannelError) -> Self {
        Reply::error(error.to_string())
    }
}

/// Applies start/pause/stop to the session store and announces them to the group
///
/// Transitions for the same session run one at a time behind a per-session lock; different
/// sessions never contend. A transition is announced only after the store accepted it.
pub struct SessionChannel {
    store: Arc<dyn SessionStore>,
    registry: Arc<GroupRegistry>,
    metrics: Arc<HubMetrics>,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl SessionChannel {
    pub fn new(
        store: Arc<dyn SessionStore>,
        registry: Arc<GroupRegistry>,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
            locks: DashMap::new(),
        }
    }

    pub async fn start(&self, session_id: SessionId) -> Result<Reply, ChannelError> {
        self.apply(session_id, Action::Start).await
    }

    pub async fn pause(&self, session_id: SessionId) -> Result<Reply, ChannelError> {
        self.apply(session_id, Action::Pause).await
    }

    pub async fn stop(&self, session_id: SessionId) -> Result<Reply, ChannelError> {
        self.apply(session_id, Action::Stop).await
    }

    /// Run one lifecycle transition under the session's lock
    pub async fn apply(&self, session_id: SessionId, action: Action) -> Result<Reply, ChannelError> {
        if action.is_signal() {
            return Err(ChannelError::NotLifecycle(action));
        }

        let lock = self.lifecycle_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.transition(session_id, action).await
        };
        drop(lock);
        self.release(session_id);

        result
    }

    /// Drop the session's lock entry once nobody is attached or mid-transition
    pub fn release(&self, session_id: SessionId) {
        let removed = self.locks.remove_if(&session_id, |_, lock| {
            Arc::strong_count(lock) == 1 && self.registry.member_count(session_id) == 0
        });
        if removed.is_some() {
            debug!(session_id, "released lifecycle lock");
        }
    }

    /// Number of sessions currently holding a lifecycle lock entry
    pub fn tracked_sessions(&self) -> usize {
        self.locks.len()
    }

    fn lifecycle_lock(&self, session_id: SessionId) -> Arc<Mutex<()>> {
        self.locks.entry(session_id).or_default().clone()
    }

    async fn transition(&self, session_id: SessionId, action: Action) -> Result<Reply, ChannelError> {
        let session = self
            .store
            .get_session(session_id)
            .await
            .map_err(|e| ChannelError::from_store(session_id, e))?;

        match action {
            Action::Start => self.start_locked(session).await,
            Action::Pause => self.pause_locked(session).await,
            Action::Stop => self.stop_locked(session).await,
            signal => Err(ChannelError::NotLifecycle(signal)),
        }
    }

    async fn start_locked(&self, mut session: Session) -> Result<Reply, ChannelError> {
        let state = session.state();
        if state == LifecycleState::Active {
            debug!(session_id = session.id, "start on active session, nothing to do");
            return Ok(Reply::started());
        }

        let notify = !session.notification_sent;
        session.is_active = true;
        session.is_paused = false;
        if state != LifecycleState::Paused {
            session.started_at = Some(Utc::now());
        }
        session.notification_sent = true;
        self.persist(&session).await?;

        info!("Session {} started", session.id);
        let reply = Reply::started();
        self.registry.broadcast(session.id, &reply, None);
        if notify {
            info!("Notifying members that session {} has started", session.id);
            self.registry.broadcast(
                session.id,
                &Notification::session_started(&session.title),
                None,
            );
        }
        self.metrics.record_transition("started");
        Ok(reply)
    }

    async fn pause_locked(&self, mut session: Session) -> Result<Reply, ChannelError> {
        let state = session.state();
        if state != LifecycleState::Active {
            return Err(ChannelError::InvalidTransition {
                action: Action::Pause,
                state,
            });
        }

        session.is_paused = true;
        self.persist(&session).await?;

        info!("Session {} paused", session.id);
        let reply = Reply::paused();
        self.registry.broadcast(session.id, &reply, None);
        self.metrics.record_transition("paused");
        Ok(reply)
    }

    async fn stop_locked(&self, mut session: Session) -> Result<Reply, ChannelError> {
        let state = session.state();
        if !matches!(state, LifecycleState::Active | LifecycleState::Paused) {
            return Err(ChannelError::InvalidTransition {
                action: Action::Stop,
                state,
            });
        }

        session.is_active = false;
        session.is_paused = false;
        session.stopped_at = Some(Utc::now());
        self.persist(&session).await?;

        info!("Session {} stopped", session.id);
        let reply = Reply::stopped();
        self.registry.broadcast(session.id, &reply, None);
        self.metrics.record_transition("stopped");
        Ok(reply)
    }

    async fn persist(&self, session: &Session) -> Result<(), ChannelError> {
        self.store.save_session(session).await.map_err(|e| {
            warn!(session_id = session.id, error = %e, "lifecycle write failed, not broadcasting");
            ChannelError::from_store(session.id, e)
        })
    }
}
