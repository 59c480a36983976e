//! Recall engine: similarity-ranked retrieval of long-term memories.
//!
//! Two paths produce the same contract:
//!
//! 1. **Native**: the store's own similarity function ranks server-side.
//! 2. **Fallback**: unranked candidates are fetched and ranked in-process
//!    with cosine similarity.
//!
//! Any native-path error (including [`MemoryError::Unsupported`]) switches to
//! the fallback. Errors from the fallback fetch are returned to the caller.

use recallkit_config::RecallConfig;
use recallkit_core::error::MemoryError;
use recallkit_core::memory::{MemoryStore, MemoryType, RecallResult, SimilarityQuery};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::vector;

/// Parameters for one recall.
#[derive(Debug, Clone)]
pub struct RecallQuery<'a> {
    pub agent_id: &'a str,
    pub embedding: &'a [f32],
    pub limit: usize,
    pub threshold: f32,
    pub memory_type: Option<MemoryType>,
}

impl<'a> RecallQuery<'a> {
    /// A query with the default limit (10) and threshold (0.7).
    pub fn new(agent_id: &'a str, embedding: &'a [f32]) -> Self {
        Self {
            agent_id,
            embedding,
            limit: 10,
            threshold: 0.7,
            memory_type: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }
}

#[derive(Clone)]
pub struct RecallEngine {
    store: Arc<dyn MemoryStore>,
    /// Minimum number of rows fetched for in-process ranking.
    candidate_pool: usize,
    default_limit: usize,
    default_threshold: f32,
}

impl RecallEngine {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self::from_config(store, &RecallConfig::default())
    }

    pub fn from_config(store: Arc<dyn MemoryStore>, config: &RecallConfig) -> Self {
        Self {
            store,
            candidate_pool: config.fallback_candidate_pool,
            default_limit: config.default_limit,
            default_threshold: config.default_threshold,
        }
    }

    /// A query carrying this engine's configured limit and threshold.
    pub fn query<'a>(&self, agent_id: &'a str, embedding: &'a [f32]) -> RecallQuery<'a> {
        RecallQuery::new(agent_id, embedding)
            .limit(self.default_limit)
            .threshold(self.default_threshold)
    }

    /// `0` makes the fallback fetch exactly `limit` candidates.
    pub fn with_candidate_pool(mut self, pool: usize) -> Self {
        self.candidate_pool = pool;
        self
    }

    /// Ranked memories with `similarity >= threshold`, at most `limit` of them.
    pub async fn search(&self, query: &RecallQuery<'_>) -> Result<Vec<RecallResult>, MemoryError> {
        if query.limit == 0 || query.embedding.is_empty() {
            return Ok(Vec::new());
        }

        match self.search_native(query).await {
            Ok(results) => {
                debug!(agent_id = %query.agent_id, count = results.len(), "Native recall");
                Ok(results)
            }
            Err(e) => {
                warn!(
                    agent_id = %query.agent_id,
                    backend = self.store.name(),
                    error = %e,
                    "Native similarity search failed, ranking in-process"
                );
                self.search_fallback(query).await
            }
        }
    }

    /// Store-side ranking. Results are re-checked against the contract.
    pub async fn search_native(
        &self,
        query: &RecallQuery<'_>,
    ) -> Result<Vec<RecallResult>, MemoryError> {
        let similarity_query = SimilarityQuery {
            agent_id: query.agent_id,
            embedding: query.embedding,
            threshold: query.threshold,
            limit: query.limit,
            memory_type: query.memory_type,
        };
        let mut results = self.store.match_memories(&similarity_query).await?;

        results.retain(|r| r.similarity >= query.threshold);
        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(query.limit);
        Ok(results)
    }

    /// In-process ranking over unranked candidates.
    pub async fn search_fallback(
        &self,
        query: &RecallQuery<'_>,
    ) -> Result<Vec<RecallResult>, MemoryError> {
        let fetch = query.limit.max(self.candidate_pool);
        let candidates = self
            .store
            .candidates(query.agent_id, query.memory_type, fetch)
            .await?;
        let scanned = candidates.len();

        let results =
            vector::rank_by_similarity(candidates, query.embedding, query.threshold, query.limit);
        debug!(agent_id = %query.agent_id, scanned, count = results.len(), "Fallback recall");
        Ok(results)
    }
}
