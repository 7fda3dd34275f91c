//! SQLite-backed cursor store.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::debug;

use super::CursorStore;

/// Schema for cursor storage.
const CURSOR_STORE_SCHEMA: &str = r"
-- Consumer cursor storage
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS cursor_store (
    key           TEXT PRIMARY KEY,
    value         TEXT NOT NULL,
    updated_at_ms INTEGER NOT NULL
);
";

/// Errors surfaced by [`SqliteCursorStore`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CursorStoreError {
    /// Connection mutex was poisoned by a panicking holder.
    #[error("cursor store connection mutex poisoned")]
    Lock,

    /// Underlying SQLite failure.
    #[error("cursor database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The blocking store task failed to complete.
    #[error("cursor store task failed: {0}")]
    TaskJoin(String),
}

/// Durable key-value store over a small SQLite table.
#[derive(Clone)]
pub struct SqliteCursorStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCursorStore {
    /// Opens (or creates) the cursor database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CursorStoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(CURSOR_STORE_SCHEMA)?;
        debug!(path = %path.as_ref().display(), "opened cursor store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory store, useful for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, CursorStoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CURSOR_STORE_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    type Error = CursorStoreError;

    async fn load(&self, key: &str) -> Result<Option<String>, Self::Error> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| CursorStoreError::Lock)?;
            conn.query_row(
                "SELECT value FROM cursor_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(CursorStoreError::from)
        })
        .await
        .map_err(|e| CursorStoreError::TaskJoin(e.to_string()))?
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), Self::Error> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        let value = value.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| CursorStoreError::Lock)?;
            conn.execute(
                "INSERT OR REPLACE INTO cursor_store (key, value, updated_at_ms)
                 VALUES (?1, ?2, ?3)",
                params![key, value, Utc::now().timestamp_millis()],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| CursorStoreError::TaskJoin(e.to_string()))?
    }
}
