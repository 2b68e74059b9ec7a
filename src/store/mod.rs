//! Durable per-user message store.
//!
//! The store owns the `fetched -> stored -> embedded` lifecycle of a message:
//! rows are inserted once (first write wins on `provider_message_id`) and the
//! only later mutation is the `processed` flag set after an embedding has been
//! written to the index.

pub mod memory;
pub mod postgres;

use crate::models::{Message, NewMessage, SyncStats, UpsertResult};
use rocket_db_pools::sqlx;
use std::collections::HashSet;
use thiserror::Error;

pub use memory::MemoryMessageStore;
pub use postgres::PgMessageStore;

/// Persistence failures. The whole batch may be retried: inserts are
/// idempotent thanks to the `(user_id, provider_message_id)` key.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

#[rocket::async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert messages that are not stored yet; existing keys are left untouched
    /// and counted as skipped.
    async fn upsert_messages(
        &self,
        user_id: &str,
        messages: &[NewMessage],
    ) -> Result<UpsertResult, StorageError>;

    /// Subset of `provider_message_ids` that already exist for the user.
    async fn known_ids(
        &self,
        user_id: &str,
        provider_message_ids: &[String],
    ) -> Result<HashSet<String>, StorageError>;

    /// Unprocessed messages in ingestion order, oldest first.
    async fn list_unprocessed(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError>;

    /// Set `processed` and `embedded_at`; no-op when already processed.
    async fn mark_processed(
        &self,
        user_id: &str,
        provider_message_id: &str,
    ) -> Result<(), StorageError>;

    /// Return every processed message to the embedding queue, e.g. after the
    /// user's index namespace was cleared. Returns the number of rows reset.
    async fn reset_processed(&self, user_id: &str) -> Result<u64, StorageError>;

    async fn get_message(
        &self,
        user_id: &str,
        provider_message_id: &str,
    ) -> Result<Option<Message>, StorageError>;

    async fn compute_stats(&self, user_id: &str) -> Result<SyncStats, StorageError>;

    /// Delete every message row for the user, returning the number removed.
    async fn clear_all(&self, user_id: &str) -> Result<u64, StorageError>;
}
