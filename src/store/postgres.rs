use super::{MessageStore, StorageError};
use crate::models::{Message, NewMessage, SyncStats, UpsertResult};
use chrono::{DateTime, Utc};
use log::debug;
use rocket_db_pools::sqlx::{self, PgPool};
use std::collections::HashSet;

/// Postgres-backed message store over the `emails` table.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Postgres rejects NUL bytes in text columns.
fn sanitize(value: &str) -> String {
    value.replace('\0', "")
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total: i64,
    processed: i64,
    last_sync: Option<DateTime<Utc>>,
}

#[rocket::async_trait]
impl MessageStore for PgMessageStore {
    async fn upsert_messages(
        &self,
        user_id: &str,
        messages: &[NewMessage],
    ) -> Result<UpsertResult, StorageError> {
        if messages.is_empty() {
            return Ok(UpsertResult::default());
        }

        let mut tx = self.pool.begin().await?;
        let mut result = UpsertResult::default();

        for message in messages {
            let inserted: Option<i64> = sqlx::query_scalar(INSERT_MESSAGE)
                .bind(user_id)
                .bind(&message.provider_message_id)
                .bind(message.thread_id.as_deref())
                .bind(sanitize(&message.subject))
                .bind(sanitize(&message.from))
                .bind(sanitize(&message.to))
                .bind(sanitize(&message.date))
                .bind(message.sent_at)
                .bind(sanitize(&message.snippet))
                .bind(message.body.as_deref().map(sanitize))
                .bind(&message.label_ids)
                .fetch_optional(&mut *tx)
                .await?;

            if inserted.is_some() {
                result.inserted_count += 1;
            } else {
                result.skipped_duplicate_count += 1;
            }
        }

        tx.commit().await?;

        debug!(
            "store: user {} batch of {} -> {} inserted, {} duplicates",
            user_id,
            messages.len(),
            result.inserted_count,
            result.skipped_duplicate_count
        );

        Ok(result)
    }

    async fn known_ids(
        &self,
        user_id: &str,
        provider_message_ids: &[String],
    ) -> Result<HashSet<String>, StorageError> {
        if provider_message_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT provider_message_id FROM emails WHERE user_id = $1 AND provider_message_id = ANY($2)",
        )
        .bind(user_id)
        .bind(provider_message_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn list_unprocessed(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let rows = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM emails WHERE user_id = $1 AND processed = FALSE ORDER BY id ASC LIMIT $2"
        ))
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn mark_processed(
        &self,
        user_id: &str,
        provider_message_id: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE emails SET processed = TRUE, embedded_at = NOW() WHERE user_id = $1 AND provider_message_id = $2 AND processed = FALSE",
        )
        .bind(user_id)
        .bind(provider_message_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reset_processed(&self, user_id: &str) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE emails SET processed = FALSE, embedded_at = NULL WHERE user_id = $1 AND processed = TRUE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_message(
        &self,
        user_id: &str,
        provider_message_id: &str,
    ) -> Result<Option<Message>, StorageError> {
        let row = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM emails WHERE user_id = $1 AND provider_message_id = $2"
        ))
        .bind(user_id)
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn compute_stats(&self, user_id: &str) -> Result<SyncStats, StorageError> {
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                CAST(COUNT(*) AS BIGINT) AS total,
                CAST(COUNT(*) FILTER (WHERE processed) AS BIGINT) AS processed,
                MAX(created_at) AS last_sync
            FROM emails
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(SyncStats {
            total_emails_count: row.total,
            processed_emails_count: row.processed,
            unprocessed_emails_count: row.total - row.processed,
            last_sync_date: row.last_sync,
        })
    }

    async fn clear_all(&self, user_id: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM emails WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

const MESSAGE_COLUMNS: &str = "user_id, provider_message_id, thread_id, subject, sender, recipients, \
     date_header, sent_at, snippet, body, label_ids, processed, embedded_at, created_at";

const INSERT_MESSAGE: &str = r#"
    INSERT INTO emails (
        user_id, provider_message_id, thread_id, subject, sender, recipients,
        date_header, sent_at, snippet, body, label_ids
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    ON CONFLICT (user_id, provider_message_id) DO NOTHING
    RETURNING id
"#;
