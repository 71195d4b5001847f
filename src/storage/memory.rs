//! In-Memory Session Storage
//!
//! Information Hiding:
//! - HashMap storage structure hidden from users
//! - Thread-safe access via RwLock hidden behind async interface
//! - Suitable for testing and ephemeral sessions

use super::{PreferenceStorage, SessionStorage, StorageResult};
use crate::history::session::ChatSession;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage using HashMaps
/// Data is lost when process terminates
#[derive(Clone)]
pub struct InMemoryStorage {
    sessions: Arc<RwLock<HashMap<String, ChatSession>>>,
    preferences: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            preferences: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for InMemoryStorage {
    async fn get_all(&self) -> StorageResult<Vec<ChatSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> StorageResult<Option<ChatSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(id).cloned())
    }

    async fn put(&self, session: &ChatSession) -> StorageResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session.clone());
        tracing::debug!(
            "[InMemoryStorage] Saved {} messages for session '{}'",
            session.messages.len(),
            session.id
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
        tracing::debug!("[InMemoryStorage] Deleted session '{}'", id);
        Ok(())
    }
}

#[async_trait]
impl PreferenceStorage for InMemoryStorage {
    async fn get_pref(&self, key: &str) -> StorageResult<Option<String>> {
        let preferences = self.preferences.read().await;
        Ok(preferences.get(key).cloned())
    }

    async fn set_pref(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut preferences = self.preferences.write().await;
        preferences.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_pref(&self, key: &str) -> StorageResult<()> {
        let mut preferences = self.preferences.write().await;
        preferences.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;

    #[tokio::test]
    async fn test_sessions_contract() {
        contract::sessions_round_trip(&InMemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn test_preferences_contract() {
        contract::preferences_round_trip(&InMemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let storage = InMemoryStorage::new();
        let view = storage.clone();

        storage.put(&contract::session("Shared", 1)).await.unwrap();

        assert_eq!(view.get_all().await.unwrap().len(), 1);
    }
}
