//! Durable Session Storage Abstraction
//!
//! Information Hiding:
//! - Storage backend implementation details hidden behind traits
//! - Allows swapping between memory, filesystem and SQLite without API changes
//! - Each storage implementation encapsulates its own data structures and protocols

use crate::history::session::{sort_entries, ChatSession, HistoryEntry};
use async_trait::async_trait;
use thiserror::Error;

pub mod filesystem;
pub mod memory;
pub mod sqlite;

pub use filesystem::FileSystemStorage;
pub use memory::InMemoryStorage;
pub use sqlite::SqliteStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage task failed: {0}")]
    Task(String),

    #[error("Invalid session id: '{0}'")]
    InvalidId(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Document store of chat sessions keyed by session id
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Load every stored session
    async fn get_all(&self) -> StorageResult<Vec<ChatSession>>;

    /// Load one session; `None` when the id is unknown
    async fn get(&self, id: &str) -> StorageResult<Option<ChatSession>>;

    /// Insert or replace a session by id
    async fn put(&self, session: &ChatSession) -> StorageResult<()>;

    /// Remove a session. Removing an unknown id succeeds.
    async fn delete(&self, id: &str) -> StorageResult<()>;

    /// Summary projection ordered by `last_modified`, most recent first
    async fn list_entries(&self) -> StorageResult<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> =
            self.get_all().await?.iter().map(ChatSession::entry).collect();
        sort_entries(&mut entries);
        Ok(entries)
    }
}

/// Key-value store for scalar preferences
#[async_trait]
pub trait PreferenceStorage: Send + Sync {
    async fn get_pref(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set_pref(&self, key: &str, value: &str) -> StorageResult<()>;

    async fn remove_pref(&self, key: &str) -> StorageResult<()>;
}
