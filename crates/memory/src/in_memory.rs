//! In-memory durable store, useful for testing and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recallkit_core::error::MemoryError;
use recallkit_core::memory::{
    LongTermMemory, MemoryFilter, MemoryPage, MemoryStore, MemoryType, RecallResult,
    SimilarityQuery,
};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::vector;

/// A [`MemoryStore`] that keeps records in a Vec.
///
/// The store-side similarity function can be switched off to behave like a
/// database without the vector extension deployed.
#[derive(Clone)]
pub struct InMemoryStore {
    entries: Arc<RwLock<Vec<LongTermMemory>>>,
    native_search: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            native_search: true,
        }
    }

    /// Create a store whose `match_memories` reports [`MemoryError::Unsupported`].
    pub fn without_native_search() -> Self {
        Self {
            native_search: false,
            ..Self::new()
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest first; ties keep insertion order reversed.
fn newest_first(entries: &[LongTermMemory]) -> impl Iterator<Item = &LongTermMemory> {
    let mut refs: Vec<&LongTermMemory> = entries.iter().rev().collect();
    refs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    refs.into_iter()
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert(&self, memory: &LongTermMemory) -> Result<(), MemoryError> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.id == memory.id) {
            return Err(MemoryError::Validation(format!(
                "Duplicate memory id: {}",
                memory.id
            )));
        }
        entries.push(memory.clone());
        Ok(())
    }

    async fn list(&self, filter: &MemoryFilter) -> Result<MemoryPage, MemoryError> {
        let entries = self.entries.read().await;
        let matching: Vec<&LongTermMemory> =
            newest_first(&entries).filter(|m| filter.matches(m)).collect();

        let total = matching.len();
        let records = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect();

        Ok(MemoryPage { records, total })
    }

    async fn get(&self, id: &str) -> Result<Option<LongTermMemory>, MemoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    async fn update_access(
        &self,
        id: &str,
        access_count: u32,
        accessed_at: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.access_count = access_count;
                entry.last_accessed_at = Some(accessed_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str, owner_id: &str) -> Result<bool, MemoryError> {
        let mut entries = self.entries.write().await;
        let len_before = entries.len();
        entries.retain(|e| !(e.id == id && e.owner_id == owner_id));
        Ok(entries.len() < len_before)
    }

    async fn candidates(
        &self,
        agent_id: &str,
        memory_type: Option<MemoryType>,
        limit: usize,
    ) -> Result<Vec<LongTermMemory>, MemoryError> {
        let entries = self.entries.read().await;
        Ok(newest_first(&entries)
            .filter(|m| m.agent_id == agent_id && m.has_embedding())
            .filter(|m| memory_type.is_none_or(|t| m.memory_type == t))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn match_memories(
        &self,
        query: &SimilarityQuery<'_>,
    ) -> Result<Vec<RecallResult>, MemoryError> {
        if !self.native_search {
            return Err(MemoryError::Unsupported(
                "match_memories is not available on this store".into(),
            ));
        }

        let entries = self.entries.read().await;
        let pool: Vec<LongTermMemory> = entries
            .iter()
            .filter(|m| m.agent_id == query.agent_id)
            .filter(|m| query.memory_type.is_none_or(|t| m.memory_type == t))
            .cloned()
            .collect();

        Ok(vector::rank_by_similarity(
            pool,
            query.embedding,
            query.threshold,
            query.limit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, owner: &str, age_secs: i64, embedding: Option<Vec<f32>>) -> LongTermMemory {
        LongTermMemory {
            id: id.into(),
            agent_id: "agent".into(),
            owner_id: owner.into(),
            content: format!("memory {id}"),
            memory_type: MemoryType::Episodic,
            embedding,
            importance: 0.5,
            access_count: 0,
            last_accessed_at: None,
            session_id: None,
            message_id: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paginated() {
        let store = InMemoryStore::new();
        store.insert(&record("old", "o", 30, None)).await.unwrap();
        store.insert(&record("new", "o", 0, None)).await.unwrap();
        store.insert(&record("mid", "o", 10, None)).await.unwrap();

        let mut filter = MemoryFilter::for_agent("agent");
        filter.limit = 2;
        let page = store.list(&filter).await.unwrap();
        assert_eq!(page.total, 3);
        let ids: Vec<_> = page.records.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);

        filter.offset = 2;
        let page = store.list(&filter).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].id, "old");
    }

    #[tokio::test]
    async fn duplicate_id_rejected() {
        let store = InMemoryStore::new();
        store.insert(&record("a", "o", 0, None)).await.unwrap();
        let err = store.insert(&record("a", "o", 0, None)).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_is_owner_scoped() {
        let store = InMemoryStore::new();
        store.insert(&record("a", "alice", 0, None)).await.unwrap();

        assert!(!store.delete("a", "bob").await.unwrap());
        assert!(!store.delete("missing", "alice").await.unwrap());
        assert!(store.delete("a", "alice").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn candidates_skip_records_without_embedding() {
        let store = InMemoryStore::new();
        store.insert(&record("a", "o", 0, Some(vec![1.0, 0.0]))).await.unwrap();
        store.insert(&record("b", "o", 0, None)).await.unwrap();

        let found = store.candidates("agent", None, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }

    #[tokio::test]
    async fn native_search_can_be_disabled() {
        let store = InMemoryStore::without_native_search();
        let query = SimilarityQuery {
            agent_id: "agent",
            embedding: &[1.0, 0.0],
            threshold: 0.7,
            limit: 10,
            memory_type: None,
        };
        let err = store.match_memories(&query).await.unwrap_err();
        assert!(matches!(err, MemoryError::Unsupported(_)));
    }

    #[tokio::test]
    async fn update_access_reports_missing_rows() {
        let store = InMemoryStore::new();
        store.insert(&record("a", "o", 0, None)).await.unwrap();

        let now = Utc::now();
        assert!(store.update_access("a", 3, now).await.unwrap());
        assert!(!store.update_access("zzz", 1, now).await.unwrap());

        let got = store.get("a").await.unwrap().unwrap();
        assert_eq!(got.access_count, 3);
        assert_eq!(got.last_accessed_at, Some(now));
    }
}
