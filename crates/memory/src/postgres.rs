//! PostgreSQL + pgvector durable store.
//!
//! Implements [`MemoryStore`] with:
//! - Owner/agent-scoped CRUD via `sqlx` (PostgreSQL driver)
//! - Embeddings stored in a pgvector column, exchanged as text literals
//! - Store-side similarity through the `match_memories` SQL function
//!
//! # Setup
//!
//! ```sql
//! CREATE EXTENSION IF NOT EXISTS vector;
//! ```
//!
//! Then call [`PostgresStore::migrate`], which applies
//! `migrations/001_long_term_memories.sql`.
//!
//! # Feature gate
//!
//! This module is behind the `postgres` feature flag:
//!
//! ```toml
//! recallkit-memory = { workspace = true, features = ["postgres"] }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::time::Duration;
use tracing::{debug, info};

use recallkit_config::DatabaseConfig;
use recallkit_core::error::MemoryError;
use recallkit_core::memory::{
    LongTermMemory, MemoryFilter, MemoryPage, MemoryStore, MemoryType, RecallResult,
    SimilarityQuery,
};

use crate::vector::{decode_vector, encode_vector};

const MIGRATION_SQL: &str = include_str!("../migrations/001_long_term_memories.sql");

/// Columns shared by every SELECT; vectors and JSON travel as text.
const COLUMNS: &str = "id, agent_id, owner_id, content, memory_type, embedding::text AS embedding, \
     importance, access_count, last_accessed_at, session_id, message_id, \
     metadata::text AS metadata, created_at";

const FILTER_CLAUSE: &str = "agent_id = $1 \
     AND ($2::text IS NULL OR memory_type = $2) \
     AND ($3::text IS NULL OR session_id = $3)";

/// PostgreSQL memory store with optional store-side similarity search.
pub struct PostgresStore {
    pool: PgPool,
    /// Dimension of embedding vectors (default 1536 for ada-002).
    embedding_dim: usize,
    /// Whether `match_memories` is deployed.
    native_search: bool,
}

impl PostgresStore {
    /// Create a new store from a connection string.
    pub async fn connect(database_url: &str) -> Result<Self, MemoryError> {
        Self::connect_with(database_url, &DatabaseConfig::default()).await
    }

    /// Create a store using the pool and vector settings from configuration.
    pub async fn connect_with_config(config: &DatabaseConfig) -> Result<Self, MemoryError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| MemoryError::Validation("database.url is not configured".into()))?;
        Self::connect_with(url, config).await
    }

    async fn connect_with(
        database_url: &str,
        config: &DatabaseConfig,
    ) -> Result<Self, MemoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| MemoryError::dependency("PostgreSQL connection failed", e))?;

        info!("Connected to PostgreSQL for long-term memory");
        Ok(Self::from_pool(pool)
            .with_embedding_dim(config.embedding_dim)
            .with_native_search(config.native_search))
    }

    /// Create from an existing connection pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            embedding_dim: 1536,
            native_search: true,
        }
    }

    /// Set the embedding dimension (default: 1536).
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    /// Declare whether the `match_memories` function is available.
    pub fn with_native_search(mut self, enabled: bool) -> Self {
        self.native_search = enabled;
        self
    }

    /// Run the schema migration.
    pub async fn migrate(&self) -> Result<(), MemoryError> {
        let sql = migration_sql(self.embedding_dim);

        sqlx::raw_sql(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Migration(format!("Migration failed: {e}")))?;

        info!(embedding_dim = self.embedding_dim, "Long-term memory schema migration complete");
        Ok(())
    }
}

/// The migration script with the embedding dimension filled in.
fn migration_sql(embedding_dim: usize) -> String {
    MIGRATION_SQL.replace("{{EMBEDDING_DIM}}", &embedding_dim.to_string())
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, MemoryError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| MemoryError::dependency(&format!("Failed to read column {name}"), e))
}

fn parse_access_count(raw: i32) -> Result<u32, MemoryError> {
    u32::try_from(raw).map_err(|e| MemoryError::dependency("Column access_count is negative", e))
}

fn parse_metadata(raw: &str) -> Result<serde_json::Value, MemoryError> {
    serde_json::from_str(raw)
        .map_err(|e| MemoryError::dependency("Column metadata is not valid JSON", e))
}

/// Convert a database row into a LongTermMemory.
fn row_to_memory(row: &PgRow) -> Result<LongTermMemory, MemoryError> {
    let memory_type: String = column(row, "memory_type")?;
    let embedding: Option<String> = column(row, "embedding")?;
    let metadata: String = column(row, "metadata")?;
    let access_count: i32 = column(row, "access_count")?;

    Ok(LongTermMemory {
        id: column(row, "id")?,
        agent_id: column(row, "agent_id")?,
        owner_id: column(row, "owner_id")?,
        content: column(row, "content")?,
        memory_type: memory_type.parse()?,
        embedding: embedding.as_deref().map(decode_vector).transpose()?,
        importance: column(row, "importance")?,
        access_count: parse_access_count(access_count)?,
        last_accessed_at: column(row, "last_accessed_at")?,
        session_id: column(row, "session_id")?,
        message_id: column(row, "message_id")?,
        metadata: parse_metadata(&metadata)?,
        created_at: column(row, "created_at")?,
    })
}

#[async_trait]
impl MemoryStore for PostgresStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn insert(&self, memory: &LongTermMemory) -> Result<(), MemoryError> {
        let embedding_str = memory.embedding.as_deref().map(encode_vector);
        let metadata = memory.metadata.to_string();

        sqlx::query(
            "INSERT INTO long_term_memories \
             (id, agent_id, owner_id, content, memory_type, embedding, importance, \
              access_count, last_accessed_at, session_id, message_id, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6::vector, $7, $8, $9, $10, $11, $12::jsonb, $13)",
        )
        .bind(&memory.id)
        .bind(&memory.agent_id)
        .bind(&memory.owner_id)
        .bind(&memory.content)
        .bind(memory.memory_type.as_str())
        .bind(embedding_str.as_deref())
        .bind(memory.importance)
        .bind(i32::try_from(memory.access_count).unwrap_or(i32::MAX))
        .bind(memory.last_accessed_at)
        .bind(&memory.session_id)
        .bind(&memory.message_id)
        .bind(&metadata)
        .bind(memory.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::dependency("Failed to store memory", e))?;

        debug!(id = %memory.id, "Inserted long-term memory row");
        Ok(())
    }

    async fn list(&self, filter: &MemoryFilter) -> Result<MemoryPage, MemoryError> {
        let memory_type = filter.memory_type.map(|t| t.as_str());

        let count_sql =
            format!("SELECT COUNT(*) AS cnt FROM long_term_memories WHERE {FILTER_CLAUSE}");
        let total: i64 = sqlx::query(&count_sql)
            .bind(&filter.agent_id)
            .bind(memory_type)
            .bind(&filter.session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::dependency("Failed to count memories", e))?
            .get("cnt");

        let page_sql = format!(
            "SELECT {COLUMNS} FROM long_term_memories WHERE {FILTER_CLAUSE} \
             ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5"
        );
        let rows = sqlx::query(&page_sql)
            .bind(&filter.agent_id)
            .bind(memory_type)
            .bind(&filter.session_id)
            .bind(filter.limit as i64)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::dependency("Failed to list memories", e))?;

        Ok(MemoryPage {
            records: rows.iter().map(row_to_memory).collect::<Result<_, _>>()?,
            total: total.max(0) as usize,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<LongTermMemory>, MemoryError> {
        let sql = format!("SELECT {COLUMNS} FROM long_term_memories WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::dependency("Failed to get memory", e))?;

        row.as_ref().map(row_to_memory).transpose()
    }

    async fn update_access(
        &self,
        id: &str,
        access_count: u32,
        accessed_at: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        let result = sqlx::query(
            "UPDATE long_term_memories SET access_count = $2, last_accessed_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(i32::try_from(access_count).unwrap_or(i32::MAX))
        .bind(accessed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::dependency("Failed to update memory access", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str, owner_id: &str) -> Result<bool, MemoryError> {
        let result = sqlx::query("DELETE FROM long_term_memories WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::dependency("Failed to delete memory", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn candidates(
        &self,
        agent_id: &str,
        memory_type: Option<MemoryType>,
        limit: usize,
    ) -> Result<Vec<LongTermMemory>, MemoryError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM long_term_memories \
             WHERE agent_id = $1 AND embedding IS NOT NULL \
             AND ($2::text IS NULL OR memory_type = $2) \
             ORDER BY created_at DESC LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(agent_id)
            .bind(memory_type.map(|t| t.as_str()))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::dependency("Failed to fetch recall candidates", e))?;

        rows.iter().map(row_to_memory).collect()
    }

    async fn match_memories(
        &self,
        query: &SimilarityQuery<'_>,
    ) -> Result<Vec<RecallResult>, MemoryError> {
        if !self.native_search {
            return Err(MemoryError::Unsupported(
                "match_memories is not deployed on this database".into(),
            ));
        }

        let sql = format!(
            "SELECT {COLUMNS}, similarity FROM match_memories($1, $2::vector, $3, $4, $5)"
        );
        let rows = sqlx::query(&sql)
            .bind(query.agent_id)
            .bind(encode_vector(query.embedding))
            .bind(query.threshold)
            .bind(i32::try_from(query.limit).unwrap_or(i32::MAX))
            .bind(query.memory_type.map(|t| t.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::dependency("match_memories failed", e))?;

        rows.iter()
            .map(|row| {
                let similarity: f32 = column(row, "similarity")?;
                Ok(RecallResult::new(row_to_memory(row)?, similarity))
            })
            .collect()
    }
}

// ── Unit tests (no DB required) ──────────────────────────────────────────
