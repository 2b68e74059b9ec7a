use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::FromRow;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Content type tag attached to every vector written by the email pipeline.
pub const EMAIL_CONTENT_TYPE: &str = "email";

// ===== Message Store Models =====

/// A normalized message as observed from the mailbox, before it is owned by a
/// user row in the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub from: String,
    pub to: String,
    /// Raw `Date` header in the provider's format.
    pub date: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub snippet: String,
    pub body: Option<String>,
    pub label_ids: Vec<String>,
}

/// One stored email, unique per `(user_id, provider_message_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub user_id: String,
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    #[sqlx(rename = "sender")]
    pub from: String,
    #[sqlx(rename = "recipients")]
    pub to: String,
    #[sqlx(rename = "date_header")]
    pub date: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub snippet: String,
    pub body: Option<String>,
    pub label_ids: Vec<String>,
    pub processed: bool,
    pub embedded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn from_new(user_id: &str, message: NewMessage, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            provider_message_id: message.provider_message_id,
            thread_id: message.thread_id,
            subject: message.subject,
            from: message.from,
            to: message.to,
            date: message.date,
            sent_at: message.sent_at,
            snippet: message.snippet,
            body: message.body,
            label_ids: message.label_ids,
            processed: false,
            embedded_at: None,
            created_at,
        }
    }
}

/// Outcome of an idempotent batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertResult {
    pub inserted_count: usize,
    pub skipped_duplicate_count: usize,
}

/// Store counters, always recomputed from current rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SyncStats {
    pub total_emails_count: i64,
    pub processed_emails_count: i64,
    pub unprocessed_emails_count: i64,
    pub last_sync_date: Option<DateTime<Utc>>,
}

// ===== Embedding Index Models =====

/// Payload stored next to each vector so search results render without a
/// round-trip to the message store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EmbeddingMetadata {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub snippet: String,
    pub excerpt: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMatch {
    pub provider_message_id: String,
    pub metadata: EmbeddingMetadata,
    pub similarity_score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IndexStats {
    pub total_vectors: i64,
    pub namespace_name: String,
    pub dimension: usize,
}
