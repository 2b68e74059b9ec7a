//! Per-user vector index contract and exact cosine ranking.

use super::error::IndexError;
use crate::models::{EmbeddingMetadata, IndexStats, ScoredMatch};
use std::cmp::Ordering;

#[rocket::async_trait]
pub trait EmbeddingIndex: Send + Sync {
    /// Dimension every vector in every namespace must have.
    fn dimension(&self) -> usize;

    fn namespace_name(&self, user_id: &str) -> String;

    /// Insert or overwrite the vector for one message identity.
    async fn upsert_vector(
        &self,
        user_id: &str,
        provider_message_id: &str,
        vector: &[f32],
        metadata: &EmbeddingMetadata,
    ) -> Result<(), IndexError>;

    /// Highest-similarity entries first. `top_k` is clamped by the backend and
    /// `content_type` narrows the search when present.
    async fn query(
        &self,
        user_id: &str,
        query_vector: &[f32],
        top_k: usize,
        content_type: Option<&str>,
    ) -> Result<Vec<ScoredMatch>, IndexError>;

    /// Drop every vector for the user, returning the number removed.
    async fn delete_namespace(&self, user_id: &str) -> Result<u64, IndexError>;

    async fn stats(&self, user_id: &str) -> Result<IndexStats, IndexError>;
}

/// Reject vectors whose length differs from the index dimension.
pub fn ensure_dimension(namespace: &str, expected: usize, vector: &[f32]) -> Result<(), IndexError> {
    if vector.len() == expected {
        Ok(())
    } else {
        Err(IndexError::dimension_mismatch(
            namespace.to_string(),
            expected,
            vector.len(),
        ))
    }
}

/// Cosine similarity between two vectors; 0.0 for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Score every candidate against `query` and keep the `top_k` best.
///
/// Ties are broken by provider id so results are stable across backends.
pub fn rank_top_k<I>(query: &[f32], candidates: I, top_k: usize) -> Vec<ScoredMatch>
where
    I: IntoIterator<Item = (String, EmbeddingMetadata, Vec<f32>)>,
{
    let mut scored: Vec<ScoredMatch> = candidates
        .into_iter()
        .map(|(provider_message_id, metadata, vector)| ScoredMatch {
            similarity_score: cosine_similarity(query, &vector),
            provider_message_id,
            metadata,
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.provider_message_id.cmp(&b.provider_message_id))
    });
    scored.truncate(top_k);
    scored
}
