//! Session store boundary
//!
//! The persistence layer (users, schools, lessons, progress) lives outside this crate.
//! The hub only needs to read and write the lifecycle fields of a session, which it does
//! through the [`SessionStore`] trait. [`InMemorySessionStore`] backs the standalone server
//! and the tests.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Identifier of a live teaching session
pub type SessionId = i64;

/// Lifecycle state derived from the persisted flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Active,
    Paused,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Active => "active",
            LifecycleState::Paused => "paused",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Persisted session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    #[serde(default)]
    pub is_active: bool,
    /// Only meaningful while `is_active` is set
    #[serde(default)]
    pub is_paused: bool,
    /// Set once the "session has started" notification went out
    #[serde(default)]
    pub notification_sent: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a fresh, never started session
    pub fn new(id: SessionId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            is_active: false,
            is_paused: false,
            notification_sent: false,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        match (self.is_active, self.is_paused) {
            (true, true) => LifecycleState::Paused,
            (true, false) => LifecycleState::Active,
            (false, _) if self.stopped_at.is_some() => LifecycleState::Stopped,
            (false, _) => LifecycleState::Idle,
        }
    }
}

/// Error types for session store operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Session {0} not found")]
    NotFound(SessionId),
    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Narrow accessor interface onto the external session store
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the current record for a session
    async fn get_session(&self, id: SessionId) -> Result<Session, StoreError>;

    /// Persist the full record of a session
    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;
}

/// Seed file layout: `[[sessions]]` tables with at least `id` and `title`
#[derive(Debug, Default, Deserialize, Serialize)]
struct SeedFile {
    #[serde(default)]
    sessions: Vec<Session>,
}

/// In-process session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with sessions
    pub fn with_sessions(sessions: impl IntoIterator<Item = Session>) -> Self {
        let sessions = sessions.into_iter().map(|s| (s.id, s)).collect();
        Self {
            sessions: RwLock::new(sessions),
        }
    }

    /// Load sessions from a TOML seed file
    pub fn load_seed_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read seed file: {}", path.as_ref().display()))?;

        let seed: SeedFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse seed file: {}", path.as_ref().display()))?;

        info!(
            "Loaded {} session(s) from {}",
            seed.sessions.len(),
            path.as_ref().display()
        );
        Ok(Self::with_sessions(seed.sessions))
    }

    /// Insert or replace a session
    pub async fn insert(&self, session: Session) {
        self.sessions.write().await.insert(session.id, session);
    }

    /// Number of stored sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store holds no sessions
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session(&self, id: SessionId) -> Result<Session, StoreError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id) {
            Some(slot) => {
                *slot = session.clone();
                debug!("Saved session {} ({})", session.id, session.state());
                Ok(())
            }
            None => Err(StoreError::NotFound(session.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_state_derivation() {
        let mut session = Session::new(1, "Algebra");
        assert_eq!(session.state(), LifecycleState::Idle);

        session.is_active = true;
        assert_eq!(session.state(), LifecycleState::Active);

        session.is_paused = true;
        assert_eq!(session.state(), LifecycleState::Paused);

        session.is_active = false;
        session.is_paused = false;
        session.stopped_at = Some(Utc::now());
        assert_eq!(session.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_get_and_save() {
        let store = InMemorySessionStore::with_sessions([Session::new(7, "Biology")]);

        let mut session = store.get_session(7).await.unwrap();
        session.is_active = true;
        store.save_session(&session).await.unwrap();

        assert!(store.get_session(7).await.unwrap().is_active);
        assert_eq!(store.get_session(8).await, Err(StoreError::NotFound(8)));
    }

    #[tokio::test]
    async fn test_save_unknown_session_is_not_found() {
        let store = InMemorySessionStore::new();
        let result = store.save_session(&Session::new(3, "Ghost")).await;
        assert_eq!(result, Err(StoreError::NotFound(3)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_load_seed_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[sessions]]\nid = 1\ntitle = \"Chemistry\"\n\n[[sessions]]\nid = 2\ntitle = \"History\"\nis_active = true"
        )
        .unwrap();

        let store = InMemorySessionStore::load_seed_file(file.path()).unwrap();
        assert_eq!(store.len().await, 2);
        let history = store.get_session(2).await.unwrap();
        assert_eq!(history.title, "History");
        assert_eq!(history.state(), LifecycleState::Active);
    }
}
