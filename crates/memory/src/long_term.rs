//! Long-term memory store: owner-scoped durable records.
//!
//! Wraps an injected [`MemoryStore`] backend with validation, identity
//! assignment and access tracking. Content and embeddings are never
//! rewritten after `store`; only the access statistics change, via `touch`.

use chrono::Utc;
use recallkit_config::DatabaseConfig;
use recallkit_core::error::MemoryError;
use recallkit_core::memory::{
    DEFAULT_IMPORTANCE, LongTermMemory, MemoryFilter, MemoryPage, MemoryStore, NewMemory,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct LongTermMemoryStore {
    backend: Arc<dyn MemoryStore>,
    /// Required embedding length; `None` accepts any length.
    embedding_dim: Option<usize>,
}

impl LongTermMemoryStore {
    pub fn new(backend: Arc<dyn MemoryStore>) -> Self {
        Self {
            backend,
            embedding_dim: None,
        }
    }

    pub fn from_config(backend: Arc<dyn MemoryStore>, config: &DatabaseConfig) -> Self {
        Self::new(backend).with_embedding_dim(config.embedding_dim)
    }

    /// Require embeddings of exactly `dim` components (0 disables the check).
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = (dim > 0).then_some(dim);
        self
    }

    /// The injected backend, shared with the recall engine.
    pub fn backend(&self) -> Arc<dyn MemoryStore> {
        Arc::clone(&self.backend)
    }

    /// Insert a new memory.
    ///
    /// Fails with [`MemoryError::Validation`] if the content is blank or the
    /// embedding has the wrong dimensionality.
    pub async fn store(&self, new: NewMemory) -> Result<LongTermMemory, MemoryError> {
        if new.content.trim().is_empty() {
            return Err(MemoryError::Validation("content must not be empty".into()));
        }

        if let (Some(embedding), Some(dim)) = (&new.embedding, self.embedding_dim) {
            if embedding.len() != dim {
                return Err(MemoryError::Validation(format!(
                    "embedding has {} components, expected {dim}",
                    embedding.len()
                )));
            }
        }

        let memory = LongTermMemory {
            id: Uuid::new_v4().to_string(),
            agent_id: new.agent_id,
            owner_id: new.owner_id,
            content: new.content,
            memory_type: new.memory_type,
            embedding: new.embedding,
            importance: new.importance.unwrap_or(DEFAULT_IMPORTANCE).clamp(0.0, 1.0),
            access_count: 0,
            last_accessed_at: None,
            session_id: new.session_id,
            message_id: new.message_id,
            metadata: new.metadata.unwrap_or_else(|| serde_json::json!({})),
            created_at: Utc::now(),
        };

        self.backend.insert(&memory).await?;
        debug!(
            id = %memory.id,
            agent_id = %memory.agent_id,
            memory_type = %memory.memory_type,
            has_embedding = memory.has_embedding(),
            "Stored long-term memory"
        );
        Ok(memory)
    }

    /// Paginated listing, newest first.
    pub async fn list(&self, filter: &MemoryFilter) -> Result<MemoryPage, MemoryError> {
        self.backend.list(filter).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<LongTermMemory>, MemoryError> {
        self.backend.get(id).await
    }

    /// Record one access: bump `access_count` and stamp `last_accessed_at`.
    ///
    /// Read-then-write, not atomic: concurrent touches may lose increments.
    /// Returns `false` when the memory does not exist.
    pub async fn touch(&self, id: &str) -> Result<bool, MemoryError> {
        let Some(current) = self.backend.get(id).await? else {
            return Ok(false);
        };

        let count = current.access_count.saturating_add(1);
        let touched = self.backend.update_access(id, count, Utc::now()).await?;
        debug!(id = %id, access_count = count, "Touched long-term memory");
        Ok(touched)
    }

    /// Delete a memory owned by `owner_id`. Returns `false` if nothing matched.
    pub async fn delete(&self, id: &str, owner_id: &str) -> Result<bool, MemoryError> {
        let deleted = self.backend.delete(id, owner_id).await?;
        debug!(id = %id, deleted = %deleted, "Delete long-term memory");
        Ok(deleted)
    }
}
