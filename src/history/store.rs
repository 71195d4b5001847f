//! History Store
//!
//! Information Hiding:
//! - The recency index is patched only from completed storage writes
//! - `last_modified` stamps are issued here and strictly increase
//! - Backend choice is hidden behind `SessionStorage`

use super::session::{sort_entries, ChatSession, HistoryEntry};
use crate::chat::message::{now_millis, Message};
use crate::storage::{SessionStorage, StorageError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Session '{0}' not found")]
    NotFound(String),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

pub struct HistoryStore {
    storage: Arc<dyn SessionStorage>,
    index: Vec<HistoryEntry>,
    is_loading: bool,
    current_session_id: Option<String>,
    last_stamp: i64,
}

impl HistoryStore {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            storage,
            index: Vec::new(),
            is_loading: false,
            current_session_id: None,
            last_stamp: 0,
        }
    }

    pub fn index(&self) -> &[HistoryEntry] {
        &self.index
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    pub fn set_current(&mut self, id: Option<String>) {
        self.current_session_id = id;
    }

    /// Rebuild the index from storage
    pub async fn load_index(&mut self) -> HistoryResult<&[HistoryEntry]> {
        self.is_loading = true;
        let result = self.storage.list_entries().await;
        self.is_loading = false;

        let mut entries = result?;
        sort_entries(&mut entries);
        if let Some(latest) = entries.first() {
            self.last_stamp = self.last_stamp.max(latest.last_modified);
        }
        self.index = entries;

        tracing::info!("[HistoryStore] Loaded {} history entries", self.index.len());
        Ok(&self.index)
    }

    /// Missing sessions are `Ok(None)`
    pub async fn load_session(&self, id: &str) -> HistoryResult<Option<ChatSession>> {
        Ok(self.storage.get(id).await?)
    }

    /// Upsert `session`, stamping `last_modified`. Returns what was written.
    pub async fn save_session(&mut self, mut session: ChatSession) -> HistoryResult<ChatSession> {
        session.last_modified = self.next_stamp();
        session.messages = session
            .messages
            .into_iter()
            .map(Message::normalized)
            .collect();

        self.storage.put(&session).await?;
        self.upsert_entry(session.entry());

        tracing::debug!(
            "[HistoryStore] Saved session '{}' with {} messages",
            session.id,
            session.messages.len()
        );
        Ok(session)
    }

    pub async fn delete_session(&mut self, id: &str) -> HistoryResult<()> {
        self.storage.delete(id).await?;
        self.index.retain(|entry| entry.id != id);
        if self.current_session_id.as_deref() == Some(id) {
            self.current_session_id = None;
        }

        tracing::info!("[HistoryStore] Deleted session '{}'", id);
        Ok(())
    }

    pub async fn rename_session(
        &mut self,
        id: &str,
        title: impl Into<String>,
    ) -> HistoryResult<Option<HistoryEntry>> {
        self.rename_where(id, title.into(), |_| true).await
    }

    /// Rename only while the session still carries the default title
    pub async fn rename_untitled_session(
        &mut self,
        id: &str,
        title: impl Into<String>,
    ) -> HistoryResult<Option<HistoryEntry>> {
        self.rename_where(id, title.into(), ChatSession::has_default_title)
            .await
    }

    async fn rename_where(
        &mut self,
        id: &str,
        title: String,
        accept: fn(&ChatSession) -> bool,
    ) -> HistoryResult<Option<HistoryEntry>> {
        let Some(mut session) = self.storage.get(id).await? else {
            tracing::debug!("[HistoryStore] Rename ignored, session '{}' not found", id);
            return Ok(None);
        };
        if !accept(&session) {
            tracing::debug!(
                "[HistoryStore] Rename ignored, session '{}' is already titled '{}'",
                id,
                session.title
            );
            return Ok(None);
        }

        session.title = title;
        session.last_modified = self.next_stamp();
        self.storage.put(&session).await?;

        let entry = session.entry();
        self.upsert_entry(entry.clone());
        Ok(Some(entry))
    }

    /// Persist a copy of session `id`. The caller selects the returned session.
    pub async fn duplicate_session(&mut self, id: &str) -> HistoryResult<ChatSession> {
        let source = self
            .storage
            .get(id)
            .await?
            .ok_or_else(|| HistoryError::NotFound(id.to_string()))?;

        let copy = self.save_session(source.duplicate()).await?;
        tracing::info!("[HistoryStore] Duplicated session '{}' as '{}'", id, copy.id);
        Ok(copy)
    }

    fn next_stamp(&mut self) -> i64 {
        let stamp = now_millis().max(self.last_stamp + 1);
        self.last_stamp = stamp;
        stamp
    }

    fn upsert_entry(&mut self, entry: HistoryEntry) {
        self.index.retain(|existing| existing.id != entry.id);
        self.index.push(entry);
        sort_entries(&mut self.index);
    }
}
