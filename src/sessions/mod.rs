//! Session storage.
//!
//! The lifecycle manager sees only the narrow [`SessionStore`] capability:
//! read one, list all, patch lifecycle fields. Creating and closing sessions
//! belongs to whoever launches agents.

pub mod file;

pub use file::FileSessionStore;

use crate::data::{Session, SessionPatch};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Session>>;

    async fn list(&self) -> Result<Vec<Session>>;

    /// Apply a patch and return the updated session.
    ///
    /// Updates to the same session are serialized.
    async fn update(&self, id: &str, patch: SessionPatch) -> Result<Session>;
}

/// In-process store; sessions are lost on exit.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(sessions: impl IntoIterator<Item = Session>) -> Self {
        Self {
            sessions: RwLock::new(sessions.into_iter().map(|s| (s.id.clone(), s)).collect()),
        }
    }

    pub async fn insert(&self, session: Session) {
        self.sessions.write().await.insert(session.id.clone(), session);
    }

    pub async fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.write().await.remove(id)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> Result<Session> {
        let mut guard = self.sessions.write().await;
        let session = guard
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("session '{}' not found", id))?;
        session.apply(&patch);
        Ok(session.clone())
    }
}
