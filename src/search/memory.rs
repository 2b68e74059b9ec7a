use super::config::IndexConfig;
use super::error::IndexError;
use super::index::{EmbeddingIndex, ensure_dimension, rank_top_k};
use crate::models::{EmbeddingMetadata, IndexStats, ScoredMatch};
use dashmap::DashMap;
use std::collections::HashMap;

struct StoredVector {
    vector: Vec<f32>,
    metadata: EmbeddingMetadata,
}

/// Process-local vector index, one map per user namespace.
pub struct MemoryVectorIndex {
    config: IndexConfig,
    namespaces: DashMap<String, HashMap<String, StoredVector>>,
}

impl MemoryVectorIndex {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            namespaces: DashMap::new(),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }
}

#[rocket::async_trait]
impl EmbeddingIndex for MemoryVectorIndex {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn namespace_name(&self, user_id: &str) -> String {
        self.config.namespace_name(user_id)
    }

    async fn upsert_vector(
        &self,
        user_id: &str,
        provider_message_id: &str,
        vector: &[f32],
        metadata: &EmbeddingMetadata,
    ) -> Result<(), IndexError> {
        ensure_dimension(&self.namespace_name(user_id), self.config.dimension, vector)?;

        self.namespaces.entry(user_id.to_string()).or_default().insert(
            provider_message_id.to_string(),
            StoredVector {
                vector: vector.to_vec(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        user_id: &str,
        query_vector: &[f32],
        top_k: usize,
        content_type: Option<&str>,
    ) -> Result<Vec<ScoredMatch>, IndexError> {
        ensure_dimension(
            &self.namespace_name(user_id),
            self.config.dimension,
            query_vector,
        )?;
        let top_k = self.config.clamp_top_k(Some(top_k));

        let Some(namespace) = self.namespaces.get(user_id) else {
            return Ok(Vec::new());
        };

        let candidates = namespace
            .iter()
            .filter(|(_, stored)| {
                content_type.is_none_or(|wanted| stored.metadata.content_type == wanted)
            })
            .map(|(id, stored)| (id.clone(), stored.metadata.clone(), stored.vector.clone()));

        Ok(rank_top_k(query_vector, candidates, top_k))
    }

    async fn delete_namespace(&self, user_id: &str) -> Result<u64, IndexError> {
        Ok(self
            .namespaces
            .remove(user_id)
            .map(|(_, namespace)| namespace.len() as u64)
            .unwrap_or(0))
    }

    async fn stats(&self, user_id: &str) -> Result<IndexStats, IndexError> {
        let total_vectors = self
            .namespaces
            .get(user_id)
            .map(|namespace| namespace.len() as i64)
            .unwrap_or(0);

        Ok(IndexStats {
            total_vectors,
            namespace_name: self.namespace_name(user_id),
            dimension: self.config.dimension,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EMAIL_CONTENT_TYPE;

    fn index() -> MemoryVectorIndex {
        MemoryVectorIndex::new(IndexConfig {
            index_name: "test".into(),
            dimension: 2,
            max_top_k: 3,
            default_top_k: 2,
        })
    }

    fn metadata(subject: &str) -> EmbeddingMetadata {
        EmbeddingMetadata {
            subject: subject.into(),
            content_type: EMAIL_CONTENT_TYPE.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_identity() {
        let index = index();
        index
            .upsert_vector("u1", "m1", &[1.0, 0.0], &metadata("old"))
            .await
            .unwrap();
        index
            .upsert_vector("u1", "m1", &[0.0, 1.0], &metadata("new"))
            .await
            .unwrap();

        let matches = index.query("u1", &[0.0, 1.0], 10, None).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].metadata.subject, "new");
        assert_eq!(index.stats("u1").await.unwrap().total_vectors, 1);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected_without_touching_siblings() {
        let index = index();
        index
            .upsert_vector("u1", "m1", &[1.0, 0.0], &metadata("ok"))
            .await
            .unwrap();
        let err = index
            .upsert_vector("u1", "m2", &[1.0, 0.0, 0.0], &metadata("bad"))
            .await
            .unwrap_err();

        assert!(matches!(err, IndexError::DimensionMismatch { expected: 2, actual: 3, .. }));
        assert_eq!(index.stats("u1").await.unwrap().total_vectors, 1);
    }

    #[tokio::test]
    async fn query_clamps_top_k_and_filters_content_type() {
        let index = index();
        for (id, vector) in [("a", [1.0, 0.0]), ("b", [0.8, 0.2]), ("c", [0.5, 0.5]), ("d", [0.0, 1.0])] {
            index.upsert_vector("u1", id, &vector, &metadata(id)).await.unwrap();
        }

        let clamped = index.query("u1", &[1.0, 0.0], 100, None).await.unwrap();
        assert_eq!(clamped.len(), 3);

        let notes = index.query("u1", &[1.0, 0.0], 3, Some("note")).await.unwrap();
        assert!(notes.is_empty());
    }

    #[tokio::test]
    async fn delete_namespace_is_scoped_to_user() {
        let index = index();
        index.upsert_vector("u1", "m1", &[1.0, 0.0], &metadata("a")).await.unwrap();
        index.upsert_vector("u2", "m1", &[1.0, 0.0], &metadata("b")).await.unwrap();

        assert_eq!(index.delete_namespace("u1").await.unwrap(), 1);
        assert!(index.query("u1", &[1.0, 0.0], 3, None).await.unwrap().is_empty());
        assert_eq!(index.query("u2", &[1.0, 0.0], 3, None).await.unwrap().len(), 1);
    }
}
