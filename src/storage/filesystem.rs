//! File System Session Storage
//!
//! Information Hiding:
//! - File paths and JSON serialization format hidden from users
//! - Directory structure management hidden behind interface
//! - Persistence mechanism independent of storage trait users

use super::{PreferenceStorage, SessionStorage, StorageError, StorageResult};
use crate::history::session::ChatSession;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

/// File system storage - each session is a JSON file
/// Sessions are stored as {base_path}/sessions/{session_id}.json,
/// preferences as {base_path}/preferences.json
pub struct FileSystemStorage {
    base_path: PathBuf,
    preferences_lock: Mutex<()>,
}

impl FileSystemStorage {
    pub async fn new(base_path: PathBuf) -> StorageResult<Self> {
        fs::create_dir_all(base_path.join("sessions")).await?;

        Ok(Self {
            base_path,
            preferences_lock: Mutex::new(()),
        })
    }

    /// `None` for ids that are not a plain file stem, so no id can reach outside `sessions/`
    fn session_path(&self, session_id: &str) -> Option<PathBuf> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            tracing::warn!("[FileSystemStorage] Rejecting session id {:?}", session_id);
            return None;
        }

        Some(
            self.base_path
                .join("sessions")
                .join(format!("{}.json", session_id)),
        )
    }

    fn preferences_path(&self) -> PathBuf {
        self.base_path.join("preferences.json")
    }

    async fn read_preferences(&self) -> StorageResult<BTreeMap<String, String>> {
        let path = self.preferences_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let json = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn write_preferences(&self, preferences: &BTreeMap<String, String>) -> StorageResult<()> {
        let json = serde_json::to_string_pretty(preferences)?;
        fs::write(self.preferences_path(), json).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for FileSystemStorage {
    async fn get_all(&self) -> StorageResult<Vec<ChatSession>> {
        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(self.base_path.join("sessions")).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            let json = match fs::read_to_string(&path).await {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!("[FileSystemStorage] Skipping unreadable session {:?}: {}", path, e);
                    continue;
                }
            };
            match serde_json::from_str::<ChatSession>(&json) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    tracing::warn!("[FileSystemStorage] Skipping unreadable session {:?}: {}", path, e);
                }
            }
        }

        tracing::debug!("[FileSystemStorage] Loaded {} sessions", sessions.len());
        Ok(sessions)
    }

    async fn get(&self, id: &str) -> StorageResult<Option<ChatSession>> {
        let Some(path) = self.session_path(id) else {
            return Ok(None);
        };

        if !path.exists() {
            tracing::debug!("[FileSystemStorage] Session '{}' does not exist", id);
            return Ok(None);
        }

        let json = fs::read_to_string(&path).await?;
        let session: ChatSession = serde_json::from_str(&json)?;

        tracing::debug!(
            "[FileSystemStorage] Loaded {} messages for session '{}' from {:?}",
            session.messages.len(),
            id,
            path
        );
        Ok(Some(session))
    }

    async fn put(&self, session: &ChatSession) -> StorageResult<()> {
        let path = self
            .session_path(&session.id)
            .ok_or_else(|| StorageError::InvalidId(session.id.clone()))?;
        let json = serde_json::to_string_pretty(session)?;

        fs::write(&path, json).await?;

        tracing::debug!(
            "[FileSystemStorage] Saved {} messages for session '{}' to {:?}",
            session.messages.len(),
            session.id,
            path
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        let Some(path) = self.session_path(id) else {
            return Ok(());
        };

        if path.exists() {
            fs::remove_file(&path).await?;
            tracing::debug!("[FileSystemStorage] Deleted session '{}' at {:?}", id, path);
        } else {
            tracing::debug!("[FileSystemStorage] Session '{}' does not exist, nothing to delete", id);
        }

        Ok(())
    }
}

#[async_trait]
impl PreferenceStorage for FileSystemStorage {
    async fn get_pref(&self, key: &str) -> StorageResult<Option<String>> {
        let _guard = self.preferences_lock.lock().await;
        Ok(self.read_preferences().await?.remove(key))
    }

    async fn set_pref(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.preferences_lock.lock().await;
        let mut preferences = self.read_preferences().await?;
        preferences.insert(key.to_string(), value.to_string());
        self.write_preferences(&preferences).await
    }

    async fn remove_pref(&self, key: &str) -> StorageResult<()> {
        let _guard = self.preferences_lock.lock().await;
        let mut preferences = self.read_preferences().await?;
        if preferences.remove(key).is_some() {
            self.write_preferences(&preferences).await?;
        }
        Ok(())
    }
}
