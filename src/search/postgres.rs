use super::config::IndexConfig;
use super::error::IndexError;
use super::index::{EmbeddingIndex, ensure_dimension, rank_top_k};
use crate::models::{EmbeddingMetadata, IndexStats, ScoredMatch};
use log::debug;
use rocket_db_pools::sqlx::{self, PgPool};

/// Vector index over the `email_embeddings` table.
///
/// Vectors are stored as `REAL[]` and scored in process, which keeps the
/// schema free of extensions at the cost of a full namespace scan per query.
#[derive(Clone)]
pub struct PgVectorIndex {
    pool: PgPool,
    config: IndexConfig,
}

impl PgVectorIndex {
    pub fn new(pool: PgPool, config: IndexConfig) -> Self {
        Self { pool, config }
    }
}

#[derive(sqlx::FromRow)]
struct EmbeddingRow {
    provider_message_id: String,
    content_type: String,
    embedding: Vec<f32>,
    subject: String,
    sender: String,
    recipients: String,
    date_header: String,
    snippet: String,
    excerpt: String,
}

impl EmbeddingRow {
    fn into_candidate(self) -> (String, EmbeddingMetadata, Vec<f32>) {
        let metadata = EmbeddingMetadata {
            subject: self.subject,
            from: self.sender,
            to: self.recipients,
            date: self.date_header,
            snippet: self.snippet,
            excerpt: self.excerpt,
            content_type: self.content_type,
        };
        (self.provider_message_id, metadata, self.embedding)
    }
}

fn sanitize(value: &str) -> String {
    value.replace('\0', "")
}

#[rocket::async_trait]
impl EmbeddingIndex for PgVectorIndex {
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

        sqlx::query(
            r#"
            INSERT INTO email_embeddings (
                user_id, provider_message_id, content_type, embedding, dimension,
                subject, sender, recipients, date_header, snippet, excerpt, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (user_id, provider_message_id) DO UPDATE SET
                content_type = EXCLUDED.content_type,
                embedding = EXCLUDED.embedding,
                dimension = EXCLUDED.dimension,
                subject = EXCLUDED.subject,
                sender = EXCLUDED.sender,
                recipients = EXCLUDED.recipients,
                date_header = EXCLUDED.date_header,
                snippet = EXCLUDED.snippet,
                excerpt = EXCLUDED.excerpt,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(provider_message_id)
        .bind(&metadata.content_type)
        .bind(vector)
        .bind(vector.len() as i32)
        .bind(sanitize(&metadata.subject))
        .bind(sanitize(&metadata.from))
        .bind(sanitize(&metadata.to))
        .bind(sanitize(&metadata.date))
        .bind(sanitize(&metadata.snippet))
        .bind(sanitize(&metadata.excerpt))
        .execute(&self.pool)
        .await?;

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

        let rows = sqlx::query_as::<_, EmbeddingRow>(
            r#"
            SELECT provider_message_id, content_type, embedding, subject, sender,
                   recipients, date_header, snippet, excerpt
            FROM email_embeddings
            WHERE user_id = $1
              AND dimension = $2
              AND ($3::TEXT IS NULL OR content_type = $3)
            "#,
        )
        .bind(user_id)
        .bind(self.config.dimension as i32)
        .bind(content_type)
        .fetch_all(&self.pool)
        .await?;

        debug!(
            "index: scoring {} vectors in {}",
            rows.len(),
            self.namespace_name(user_id)
        );

        Ok(rank_top_k(
            query_vector,
            rows.into_iter().map(EmbeddingRow::into_candidate),
            top_k,
        ))
    }

    async fn delete_namespace(&self, user_id: &str) -> Result<u64, IndexError> {
        let result = sqlx::query("DELETE FROM email_embeddings WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self, user_id: &str) -> Result<IndexStats, IndexError> {
        let total_vectors: i64 = sqlx::query_scalar(
            "SELECT CAST(COUNT(*) AS BIGINT) FROM email_embeddings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(IndexStats {
            total_vectors,
            namespace_name: self.namespace_name(user_id),
            dimension: self.config.dimension,
        })
    }
}
