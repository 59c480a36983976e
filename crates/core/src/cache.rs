//! Ephemeral cache trait: the key/value collaborator behind working memory.
//!
//! The cache owns expiry, bulk reads, pattern listing and bulk deletes.
//! Patterns use glob syntax (`*`, `?`, `[...]`); callers escape literal
//! metacharacters before building one.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::MemoryError;

#[async_trait]
pub trait EphemeralCache: Send + Sync {
    /// The cache name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Write a value that expires after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), MemoryError>;

    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError>;

    /// Bulk read. The result has one slot per requested key, in order.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, MemoryError>;

    /// List live keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, MemoryError>;

    /// Bulk delete. Returns how many keys existed.
    async fn del(&self, keys: &[String]) -> Result<usize, MemoryError>;
}
