//! Vector similarity and encoding utilities.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity
//! - In-process similarity ranking over long-term memories
//! - The pgvector text representation (`[0.1,0.2,0.3]`)

use recallkit_core::error::MemoryError;
use recallkit_core::memory::{LongTermMemory, RecallResult};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector has zero norm, the lengths differ, or both are empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank memories by cosine similarity to a query embedding.
///
/// Memories without an embedding are skipped. Only results at or above
/// `threshold` are kept, sorted by descending similarity and truncated to
/// `limit`.
pub fn rank_by_similarity(
    candidates: Vec<LongTermMemory>,
    query_embedding: &[f32],
    threshold: f32,
    limit: usize,
) -> Vec<RecallResult> {
    let mut scored: Vec<RecallResult> = candidates
        .into_iter()
        .filter_map(|memory| {
            let sim = cosine_similarity(memory.embedding.as_deref()?, query_embedding);
            (sim >= threshold).then(|| RecallResult::new(memory, sim))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

/// Serialize an embedding into pgvector's text literal.
pub fn encode_vector(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Parse pgvector's text literal back into an embedding.
pub fn decode_vector(text: &str) -> Result<Vec<f32>, MemoryError> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| MemoryError::Validation(format!("Malformed vector literal: {text}")))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|e| MemoryError::Validation(format!("Bad vector component '{part}': {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use recallkit_core::memory::MemoryType;

    fn memory(id: &str, embedding: Option<Vec<f32>>) -> LongTermMemory {
        LongTermMemory {
            id: id.into(),
            agent_id: "agent".into(),
            owner_id: "owner".into(),
            content: format!("Content for {id}"),
            memory_type: MemoryType::Semantic,
            embedding,
            importance: 0.5,
            access_count: 0,
            last_accessed_at: None,
            session_id: None,
            message_id: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector() {
        let sim = cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]);
        assert_eq!(sim, 0.0);
        assert!(!sim.is_nan());
    }

    #[test]
    fn cosine_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn cosine_known_value() {
        // [1,1] · [1,0] = 1, |[1,1]| = sqrt(2), |[1,0]| = 1
        let sim = cosine_similarity(&[1.0, 1.0], &[1.0, 0.0]);
        assert!((sim - 0.7071).abs() < 0.001);
    }

    #[test]
    fn ranking_orders_by_similarity() {
        let query = vec![1.0, 0.0, 0.0];
        let candidates = vec![
            memory("a", Some(vec![0.0, 1.0, 0.0])), // orthogonal = 0
            memory("b", Some(vec![1.0, 0.0, 0.0])), // identical = 1
            memory("c", Some(vec![0.5, 0.5, 0.0])), // ~0.707
        ];

        let results = rank_by_similarity(candidates, &query, 0.0, 10);
        let ids: Vec<_> = results.iter().map(|r| r.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn ranking_respects_threshold_and_skips_missing_embeddings() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            memory("a", Some(vec![1.0, 0.0])),
            memory("b", Some(vec![0.0, 1.0])),
            memory("c", None),
        ];

        let results = rank_by_similarity(candidates, &query, 0.7, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.id, "a");
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ranking_respects_limit() {
        let query = vec![1.0, 0.0];
        let candidates: Vec<_> = (0..10)
            .map(|i| memory(&format!("e{i}"), Some(vec![1.0, i as f32 * 0.1])))
            .collect();

        let results = rank_by_similarity(candidates, &query, 0.0, 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].memory.id, "e0");
    }

    #[test]
    fn encode_matches_pgvector_literal() {
        assert_eq!(encode_vector(&[0.1, 0.2, 0.3]), "[0.1,0.2,0.3]");
        assert_eq!(encode_vector(&[]), "[]");
    }

    #[test]
    fn decode_reads_pgvector_literal() {
        assert_eq!(decode_vector("[1,0.5,-2]").unwrap(), vec![1.0, 0.5, -2.0]);
        assert_eq!(decode_vector(" [ 1 , 2 ] ").unwrap(), vec![1.0, 2.0]);
        assert!(decode_vector("[]").unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_vector("1,2,3").is_err());
        assert!(decode_vector("[1,x]").is_err());
    }
}
