//! Storage trait definitions

use crate::error::Result;
use async_trait::async_trait;

/// Trait for the local key-value substrate the store persists into.
///
/// Values are opaque text. A completed `write` must be visible to every later
/// `read` of the same key.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Read the raw value stored under `key`
    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// List every key currently stored
    async fn keys(&self) -> Result<Vec<String>>;

    /// Remove every key in the namespace
    async fn clear(&self) -> Result<()>;

    /// Get a human-readable name for this storage backend
    fn backend_name(&self) -> &'static str;
}
