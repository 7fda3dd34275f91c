//! SQLite-backed event source.
//!
//! The PSEE writer owns the `session_events` table; this side opens the
//! database read-only and never touches its schema. Expected shape:
//!
//! ```sql
//! CREATE TABLE session_events (
//!     id            TEXT PRIMARY KEY,
//!     session_id    TEXT,
//!     event_type    TEXT NOT NULL,
//!     payload       TEXT NOT NULL,   -- JSON object
//!     created_at_ms INTEGER NOT NULL
//! );
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::{Connection, OpenFlags, params};
use tracing::debug;

use super::EventSource;
use crate::event::{EventCursor, SessionEvent};

/// Errors surfaced by [`SqliteEventSource`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EventSourceError {
    /// Connection mutex was poisoned by a panicking holder.
    #[error("event source connection mutex poisoned")]
    Lock,

    /// Underlying SQLite failure (open, prepare, or query).
    #[error("event database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A row carried a payload column that is not valid JSON.
    #[error("invalid payload JSON for event {event_id}: {source}")]
    PayloadDecode {
        /// Identifier of the offending event row.
        event_id: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// A row carried a timestamp outside the representable range.
    #[error("invalid timestamp {created_at_ms} for event {event_id}")]
    InvalidTimestamp {
        /// Identifier of the offending event row.
        event_id: String,
        /// Raw millisecond value from the row.
        created_at_ms: i64,
    },

    /// The blocking query task failed to complete.
    #[error("event query task failed: {0}")]
    TaskJoin(String),
}

const FETCH_FROM_START_SQL: &str = "SELECT id, session_id, event_type, payload, created_at_ms
     FROM session_events
     ORDER BY created_at_ms ASC, id ASC
     LIMIT ?1";

// Composite tuple comparison: a plain `created_at_ms > ?` would skip rows
// sharing the cursor's timestamp, and two independent filters would refetch
// the cursor row forever.
const FETCH_AFTER_CURSOR_SQL: &str = "SELECT id, session_id, event_type, payload, created_at_ms
     FROM session_events
     WHERE created_at_ms > ?1 OR (created_at_ms = ?1 AND id > ?2)
     ORDER BY created_at_ms ASC, id ASC
     LIMIT ?3";

/// Read-only range reader over the PSEE SQLite database.
#[derive(Clone)]
pub struct SqliteEventSource {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventSource {
    /// Wraps an existing connection.
    #[must_use]
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Opens the event database at `path` read-only.
    ///
    /// # Errors
    ///
    /// Returns [`EventSourceError::Database`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EventSourceError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!(path = %path.as_ref().display(), "opened event database read-only");
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }
}

/// Raw row before payload/timestamp decoding.
type EventRow = (String, Option<String>, String, String, i64);

fn decode_row(row: EventRow) -> Result<SessionEvent, EventSourceError> {
    let (id, session_id, event_type, payload_json, created_at_ms) = row;

    let payload =
        serde_json::from_str(&payload_json).map_err(|source| EventSourceError::PayloadDecode {
            event_id: id.clone(),
            source,
        })?;

    let created_at = DateTime::from_timestamp_millis(created_at_ms).ok_or(
        EventSourceError::InvalidTimestamp {
            event_id: id.clone(),
            created_at_ms,
        },
    )?;

    Ok(SessionEvent {
        id,
        session_id,
        event_type,
        payload,
        created_at,
    })
}

fn fetch_blocking(
    conn: &Arc<Mutex<Connection>>,
    cursor: Option<&EventCursor>,
    limit: usize,
) -> Result<Vec<SessionEvent>, EventSourceError> {
    let conn = conn.lock().map_err(|_| EventSourceError::Lock)?;

    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows: Result<Vec<EventRow>, rusqlite::Error> = match cursor {
        None => {
            let mut stmt = conn.prepare(FETCH_FROM_START_SQL)?;
            let mapped = stmt.query_map(params![limit], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?;
            mapped.collect()
        },
        Some(cursor) => {
            let mut stmt = conn.prepare(FETCH_AFTER_CURSOR_SQL)?;
            let mapped = stmt.query_map(
                params![cursor.created_at_ms, cursor.event_id, limit],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )?;
            mapped.collect()
        },
    };

    rows?.into_iter().map(decode_row).collect()
}

#[async_trait]
impl EventSource for SqliteEventSource {
    type Error = EventSourceError;

    async fn fetch_after(
        &self,
        cursor: Option<&EventCursor>,
        limit: usize,
    ) -> Result<Vec<SessionEvent>, Self::Error> {
        // SQLite I/O stays off the async runtime threads.
        let conn = Arc::clone(&self.conn);
        let cursor = cursor.cloned();

        tokio::task::spawn_blocking(move || fetch_blocking(&conn, cursor.as_ref(), limit))
            .await
            .map_err(|e| EventSourceError::TaskJoin(e.to_string()))?
    }
}
