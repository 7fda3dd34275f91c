//! In-process event source for tests and embedded use.

use std::convert::Infallible;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::EventSource;
use crate::event::{EventCursor, SessionEvent};

/// Append-only in-memory event log.
///
/// Clones share the same underlying log, so a test can keep appending
/// through one handle while a consumer polls another. Fetches are sorted by
/// the composite cursor order regardless of insertion order.
#[derive(Clone, Default)]
pub struct MemoryEventSource {
    events: Arc<RwLock<Vec<SessionEvent>>>,
}

impl MemoryEventSource {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one event.
    pub fn push(&self, event: SessionEvent) {
        self.events
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }

    /// Appends a sequence of events.
    pub fn extend(&self, events: impl IntoIterator<Item = SessionEvent>) {
        self.events
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend(events);
    }

    /// Returns the number of events in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when the log holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    type Error = Infallible;

    async fn fetch_after(
        &self,
        cursor: Option<&EventCursor>,
        limit: usize,
    ) -> Result<Vec<SessionEvent>, Self::Error> {
        let mut batch: Vec<SessionEvent> = self
            .events
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|event| cursor.is_none_or(|c| event.cursor() > *c))
            .cloned()
            .collect();

        batch.sort_by_key(SessionEvent::cursor);
        batch.truncate(limit);
        Ok(batch)
    }
}
