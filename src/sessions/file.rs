//! JSON-file session store shared between processes.
//!
//! Reads take a shared lock, writes an exclusive one, so a launcher process
//! can add sessions while the lifecycle loop patches them.

use super::SessionStore;
use crate::data::{Session, SessionPatch};
use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    version: u32,
    #[serde(default)]
    sessions: BTreeMap<String, Session>,
}

impl Default for SessionFile {
    fn default() -> Self {
        Self {
            version: FILE_VERSION,
            sessions: BTreeMap::new(),
        }
    }
}

fn parse(content: &str, path: &Path) -> Result<SessionFile> {
    if content.trim().is_empty() {
        return Ok(SessionFile::default());
    }
    let file: SessionFile = serde_json::from_str(content)
        .with_context(|| format!("Failed to parse sessions from {}", path.display()))?;
    if file.version != FILE_VERSION {
        anyhow::bail!(
            "Unsupported session file version {} in {} (expected {})",
            file.version,
            path.display(),
            FILE_VERSION
        );
    }
    Ok(file)
}

fn read_file(path: &Path) -> Result<SessionFile> {
    if !path.exists() {
        return Ok(SessionFile::default());
    }

    let file = File::open(path)
        .with_context(|| format!("Failed to open sessions at {}", path.display()))?;
    file.lock_shared()?;

    let mut content = String::new();
    let read = std::io::BufReader::new(&file).read_to_string(&mut content);
    file.unlock()?;
    read?;

    parse(&content, path)
}

/// Read-modify-write under one exclusive lock.
fn modify_file<T>(path: &Path, f: impl FnOnce(&mut SessionFile) -> Result<T>) -> Result<T> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open sessions at {}", path.display()))?;
    file.lock_exclusive()?;

    let result = (|| -> Result<T> {
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let mut state = parse(&content, path)?;

        let value = f(&mut state)?;

        let serialized = serde_json::to_string_pretty(&state)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serialized.as_bytes())?;
        file.flush()?;
        Ok(value)
    })();

    file.unlock()?;
    result
}

pub struct FileSessionStore {
    path: PathBuf,
    // Serializes writers inside this process; fs2 covers other processes.
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || f(path))
            .await
            .context("session store task panicked")?
    }

    /// Add or replace a session.
    pub async fn insert(&self, session: Session) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.blocking(move |path| {
            modify_file(&path, |state| {
                state.sessions.insert(session.id.clone(), session);
                Ok(())
            })
        })
        .await
    }

    /// Remove a session that was explicitly closed.
    pub async fn remove(&self, id: &str) -> Result<Option<Session>> {
        let _guard = self.write_lock.lock().await;
        let id = id.to_string();
        self.blocking(move |path| modify_file(&path, |state| Ok(state.sessions.remove(&id))))
            .await
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let id = id.to_string();
        self.blocking(move |path| Ok(read_file(&path)?.sessions.remove(&id)))
            .await
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .blocking(|path| Ok(read_file(&path)?.sessions.into_values().collect()))
            .await?;
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> Result<Session> {
        let _guard = self.write_lock.lock().await;
        let id = id.to_string();
        self.blocking(move |path| {
            modify_file(&path, |state| {
                let session = state
                    .sessions
                    .get_mut(&id)
                    .ok_or_else(|| anyhow::anyhow!("session '{}' not found", id))?;
                session.apply(&patch);
                Ok(session.clone())
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ActivityState, RuntimeHandle};
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_lists_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions.json"));
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.get("s-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("sessions.json");
        let store = FileSessionStore::new(&path);
        store
            .insert(
                Session::new("s-1", "app", "claude")
                    .with_runtime(RuntimeHandle::new("tmux", "app-1")),
            )
            .await
            .unwrap();

        store
            .update(
                "s-1",
                SessionPatch::checked_at(Utc::now()).with_activity(ActivityState::Active),
            )
            .await
            .unwrap();

        let reopened = FileSessionStore::new(&path);
        let session = reopened.get("s-1").await.unwrap().unwrap();
        assert_eq!(session.last_known_activity, ActivityState::Active);
        assert_eq!(session.runtime_handle.unwrap().id, "app-1");
    }

    #[tokio::test]
    async fn test_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, r#"{"version": 9, "sessions": {}}"#).unwrap();
        let store = FileSessionStore::new(&path);
        assert!(store.list().await.is_err());
    }

    #[tokio::test]
    async fn test_remove_session() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions.json"));
        store.insert(Session::new("s-1", "app", "claude")).await.unwrap();
        assert!(store.remove("s-1").await.unwrap().is_some());
        assert!(store.remove("s-1").await.unwrap().is_none());
    }
}
