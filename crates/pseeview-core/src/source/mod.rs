//! Read-only access to the PSEE event log.
//!
//! The reader is deliberately dumb: one bounded, ordered range query
//! strictly after a cursor, no retries, no backoff. Failures propagate to
//! the caller (the consumer's poll loop, which logs and retries on the
//! next tick).
//!
//! # Implementations
//!
//! - [`SqliteEventSource`]: the production source, opened read-only against
//!   the SQLite database the PSEE writer owns.
//! - [`MemoryEventSource`]: an in-process source for tests and embedding.

mod memory;
mod sqlite;

use async_trait::async_trait;

pub use self::memory::MemoryEventSource;
pub use self::sqlite::{EventSourceError, SqliteEventSource};
use crate::event::{EventCursor, SessionEvent};

/// Default upper bound on the number of events returned per fetch.
pub const BATCH_SIZE: usize = 100;

/// Read-only range-query contract over the append-only event log.
///
/// Implementations must return events in ascending `(created_at, id)`
/// order, strictly after `cursor` when one is given, and from the start of
/// the log when `cursor` is `None`. They never mutate the source.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Source-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetches the next ordered batch of at most `limit` events strictly
    /// after `cursor`.
    ///
    /// # Errors
    ///
    /// Returns the implementation's error on query or decode failure; the
    /// caller decides whether to retry.
    async fn fetch_after(
        &self,
        cursor: Option<&EventCursor>,
        limit: usize,
    ) -> Result<Vec<SessionEvent>, Self::Error>;
}

/// Derives the resumption cursor from a fetched batch.
///
/// Returns the `(created_at, id)` of the last event. An empty batch yields
/// `None`; a cursor is never invented from an empty result.
#[must_use]
pub fn extract_cursor(events: &[SessionEvent]) -> Option<EventCursor> {
    events.last().map(SessionEvent::cursor)
}
