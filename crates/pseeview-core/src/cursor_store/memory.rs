//! In-memory cursor store for tests.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::CursorStore;

/// Process-local key-value store.
///
/// Clones share the same map, so tests can seed or inspect values through
/// one handle while the consumer uses another. Because values are opaque
/// strings, a test can store garbage to exercise the consumer's
/// corrupt-cursor replay path.
#[derive(Clone, Default)]
pub struct MemoryCursorStore {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryCursorStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the value under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    type Error = Infallible;

    async fn load(&self, key: &str) -> Result<Option<String>, Self::Error> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), Self::Error> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
