//! SQLite Session Storage
//!
//! Information Hiding:
//! - Schema, migrations and the `last_modified` index hidden from users
//! - Blocking rusqlite calls run on the blocking thread pool behind the async interface
//! - Sessions are stored as JSON documents next to the indexed summary columns

use super::{PreferenceStorage, SessionStorage, StorageError, StorageResult};
use crate::history::session::{ChatSession, HistoryEntry};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Migrations applied in order, tracked through `PRAGMA user_version`.
/// Never edit or remove existing entries.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS sessions (
        id            TEXT    PRIMARY KEY,
        title         TEXT    NOT NULL DEFAULT '',
        created_at    INTEGER NOT NULL DEFAULT 0,
        last_modified INTEGER NOT NULL DEFAULT 0,
        document      TEXT    NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_sessions_last_modified
        ON sessions (last_modified DESC);
    CREATE TABLE IF NOT EXISTS preferences (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );",
)];

/// SQLite-backed storage. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the database file at `path`
    pub async fn open(path: PathBuf) -> StorageResult<Self> {
        let conn = tokio::task::spawn_blocking(move || -> StorageResult<Connection> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(&path)?;
            run_migrations(&conn)?;
            tracing::info!("[SqliteStorage] Opened database at {:?}", path);
            Ok(conn)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Database living only as long as this value and its clones
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| StorageError::Task(format!("connection lock poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn run_migrations(conn: &Connection) -> StorageResult<()> {
    let current: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    for (version, sql) in MIGRATIONS {
        if *version > current {
            tracing::info!("[SqliteStorage] Applying schema migration {}", version);
            conn.execute_batch(sql)?;
            conn.pragma_update(None, "user_version", version)?;
        }
    }

    Ok(())
}

fn decode(document: String) -> StorageResult<ChatSession> {
    Ok(serde_json::from_str(&document)?)
}

#[async_trait]
impl SessionStorage for SqliteStorage {
    async fn get_all(&self) -> StorageResult<Vec<ChatSession>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT document FROM sessions")?;
            let documents = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            documents.into_iter().map(decode).collect()
        })
        .await
    }

    async fn get(&self, id: &str) -> StorageResult<Option<ChatSession>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let document: Option<String> = conn
                .query_row(
                    "SELECT document FROM sessions WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            document.map(decode).transpose()
        })
        .await
    }

    async fn put(&self, session: &ChatSession) -> StorageResult<()> {
        let document = serde_json::to_string(session)?;
        let session_id = session.id.clone();
        let title = session.title.clone();
        let created_at = session.created_at;
        let last_modified = session.last_modified;
        let message_count = session.messages.len();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, title, created_at, last_modified, document)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    created_at = excluded.created_at,
                    last_modified = excluded.last_modified,
                    document = excluded.document",
                params![session_id, title, created_at, last_modified, document],
            )?;
            tracing::debug!(
                "[SqliteStorage] Saved {} messages for session '{}'",
                message_count,
                session_id
            );
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            tracing::debug!("[SqliteStorage] Deleted session '{}' ({} rows)", id, removed);
            Ok(())
        })
        .await
    }

    async fn list_entries(&self) -> StorageResult<Vec<HistoryEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, last_modified FROM sessions
                 ORDER BY last_modified DESC, id ASC",
            )?;
            let entries = stmt
                .query_map([], |row| {
                    Ok(HistoryEntry {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        last_modified: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
    }
}

#[async_trait]
impl PreferenceStorage for SqliteStorage {
    async fn get_pref(&self, key: &str) -> StorageResult<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM preferences WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn set_pref(&self, key: &str, value: &str) -> StorageResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO preferences (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove_pref(&self, key: &str) -> StorageResult<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM preferences WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}
