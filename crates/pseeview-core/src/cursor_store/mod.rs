//! Durable storage for the consumer's resumption cursor.
//!
//! The contract is a plain string key-value store: values are opaque here,
//! and the consumer owns cursor (de)serialization. A stored value that no
//! longer parses is the consumer's signal to replay from the start of the
//! log, not a storage error.
//!
//! # Implementations
//!
//! - [`SqliteCursorStore`]: single-table WAL-mode SQLite store.
//! - [`MemoryCursorStore`]: process-local map for tests.

mod memory;
mod sqlite;

use async_trait::async_trait;

pub use self::memory::MemoryCursorStore;
pub use self::sqlite::{CursorStoreError, SqliteCursorStore};

/// Durable string key-value contract for cursor persistence.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Store-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Loads the value stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns the implementation's error when the store is unreachable.
    async fn load(&self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns the implementation's error when the write fails; the caller
    /// must treat the cursor as not persisted.
    async fn save(&self, key: &str, value: &str) -> Result<(), Self::Error>;
}
