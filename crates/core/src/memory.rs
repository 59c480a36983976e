//! Long-term memory domain types and the durable store trait.
//!
//! Long-term memories are owner-scoped records that may carry an embedding
//! vector. Records without an embedding never take part in similarity
//! recall but remain visible through listing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Default importance assigned when the caller does not provide one.
pub const DEFAULT_IMPORTANCE: f32 = 0.5;

/// Classification of a long-term memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Something that happened (a conversation turn, an event).
    #[default]
    Episodic,
    /// A fact or preference.
    Semantic,
    /// How to do something.
    Procedural,
    /// A conclusion drawn from other memories.
    Reflection,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Reflection => "reflection",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            "reflection" => Ok(Self::Reflection),
            other => Err(MemoryError::Validation(format!("Unknown memory type: {other}"))),
        }
    }
}

/// A durable, owner-scoped memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermMemory {
    /// Unique ID (UUID v4).
    pub id: String,

    /// Agent the memory belongs to.
    pub agent_id: String,

    /// Owner (end user) the memory belongs to.
    pub owner_id: String,

    /// Immutable text content.
    pub content: String,

    pub memory_type: MemoryType,

    /// Optional embedding vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Importance in `[0, 1]`.
    pub importance: f32,

    /// Number of times this memory was surfaced into a context window.
    pub access_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,

    /// Session the memory was captured in (lookup only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Message the memory was derived from (lookup only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(default)]
    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl LongTermMemory {
    /// Whether this memory can take part in similarity recall.
    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }
}

/// Caller-supplied fields for a new long-term memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMemory {
    pub agent_id: String,
    pub owner_id: String,
    pub content: String,
    #[serde(default)]
    pub memory_type: MemoryType,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub importance: Option<f32>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl NewMemory {
    pub fn new(
        agent_id: impl Into<String>,
        owner_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            owner_id: owner_id.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Filter for paginated listing, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFilter {
    pub agent_id: String,
    #[serde(default)]
    pub memory_type: Option<MemoryType>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_list_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_list_limit() -> usize {
    50
}

impl MemoryFilter {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            memory_type: None,
            session_id: None,
            limit: default_list_limit(),
            offset: 0,
        }
    }

    /// Whether a record passes the agent/type/session predicates.
    pub fn matches(&self, memory: &LongTermMemory) -> bool {
        memory.agent_id == self.agent_id
            && self.memory_type.is_none_or(|t| memory.memory_type == t)
            && self
                .session_id
                .as_ref()
                .is_none_or(|s| memory.session_id.as_ref() == Some(s))
    }
}

/// One page of a listing plus the total count of matching rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPage {
    pub records: Vec<LongTermMemory>,
    pub total: usize,
}

/// A long-term memory paired with its similarity to one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallResult {
    pub memory: LongTermMemory,
    /// Similarity in `[0, 1]`.
    pub similarity: f32,
}

impl RecallResult {
    /// Pair a memory with a raw cosine score, clamping it into `[0, 1]`.
    pub fn new(memory: LongTermMemory, similarity: f32) -> Self {
        Self {
            memory,
            similarity: similarity.clamp(0.0, 1.0),
        }
    }
}

/// Arguments for the store-side similarity function.
#[derive(Debug, Clone)]
pub struct SimilarityQuery<'a> {
    pub agent_id: &'a str,
    pub embedding: &'a [f32],
    pub threshold: f32,
    pub limit: usize,
    pub memory_type: Option<MemoryType>,
}

/// The durable long-term memory store.
///
/// Implementations: PostgreSQL + pgvector, in-memory (for testing).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "postgres", "in_memory").
    fn name(&self) -> &str;

    /// Insert a fully-formed record.
    async fn insert(&self, memory: &LongTermMemory) -> Result<(), MemoryError>;

    /// Paginated listing, newest first.
    async fn list(&self, filter: &MemoryFilter) -> Result<MemoryPage, MemoryError>;

    /// Get a memory by ID.
    async fn get(&self, id: &str) -> Result<Option<LongTermMemory>, MemoryError>;

    /// Overwrite the access statistics of a record. Returns `false` if no row matched.
    async fn update_access(
        &self,
        id: &str,
        access_count: u32,
        accessed_at: DateTime<Utc>,
    ) -> Result<bool, MemoryError>;

    /// Delete a record owned by `owner_id`. Returns `false` if no row matched.
    async fn delete(&self, id: &str, owner_id: &str) -> Result<bool, MemoryError>;

    /// Unranked records with an embedding for an agent (optionally one type),
    /// used by in-process ranking.
    async fn candidates(
        &self,
        agent_id: &str,
        memory_type: Option<MemoryType>,
        limit: usize,
    ) -> Result<Vec<LongTermMemory>, MemoryError>;

    /// Store-side similarity search, ranked by descending similarity.
    ///
    /// Backends without the capability return [`MemoryError::Unsupported`].
    async fn match_memories(
        &self,
        query: &SimilarityQuery<'_>,
    ) -> Result<Vec<RecallResult>, MemoryError>;
}
