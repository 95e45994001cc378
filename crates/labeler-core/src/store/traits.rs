//! Key-value store trait.

use crate::error::Result;

/// Asynchronous per-document key-value store.
///
/// No multi-key transaction is offered. Callers that need cross-key
/// consistency must sequence their awaits; see [`crate::cache::SlotAllocator`].
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the stored value, or `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All keys currently stored.
    async fn list_keys(&self) -> Result<Vec<String>>;
}
