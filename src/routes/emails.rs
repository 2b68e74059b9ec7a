//! Email sync, index inspection, semantic search and clear endpoints.

use super::guards::MailboxToken;
use super::require_user_id;
use crate::error::ApiError;
use crate::mail::DateRange;
use crate::state::AppState;
use crate::sync::{SyncReport, SyncRequest};
use chrono::{DateTime, Utc};
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request body for `POST /emails/sync`.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SyncEmailsRequest {
    pub user_id: String,
    /// Cap on messages listed from the mailbox; zero only embeds pending messages.
    pub max_emails: Option<usize>,
    /// Page size for mailbox listing and embedding batches.
    pub batch_size: Option<usize>,
    /// Inclusive lower bound, `YYYY/MM/DD` or `YYYY-MM-DD`.
    pub start_date: Option<String>,
    /// Inclusive upper bound, `YYYY/MM/DD` or `YYYY-MM-DD`.
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SyncEmailsResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: SyncReport,
}

impl From<SyncReport> for SyncEmailsResponse {
    fn from(report: SyncReport) -> Self {
        Self {
            success: report.error.is_none(),
            report,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SyncStatsResponse {
    pub success: bool,
    pub user_id: String,
    pub total_emails_count: i64,
    pub processed_emails_count: i64,
    pub unprocessed_emails_count: i64,
    /// Insertion time of the most recently stored message.
    pub last_sync_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct EmbeddingStatsResponse {
    pub success: bool,
    /// Vectors stored in the user's namespace.
    pub total_emails: i64,
    pub user_id: String,
    pub index_name: String,
    pub namespace: String,
    pub dimension: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchResult {
    pub email_id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub snippet: String,
    pub similarity_score: f32,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchResponse {
    pub success: bool,
    pub query: String,
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body shared by the clear, purge and cancel endpoints.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UserRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ClearEmbeddingsResponse {
    pub success: bool,
    pub deleted_vectors: u64,
    /// Stored messages returned to the embedding queue.
    pub requeued_emails: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ClearStoreResponse {
    pub success: bool,
    pub deleted_emails: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct PurgeResponse {
    pub success: bool,
    pub deleted_emails: u64,
    pub deleted_vectors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct CancelSyncResponse {
    pub success: bool,
    /// Number of in-flight syncs that were signalled.
    pub cancelled: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

const MISSING_USER_ID: &str = "user_id is required";

fn body_user_id(request: &UserRequest) -> Option<String> {
    request
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Pull new mail for the user, store it and embed everything pending.
///
/// Partial failures still return 200 with the counts reached; `success` is
/// false and `error` describes why the run stopped.
#[openapi(tag = "Emails")]
#[post("/emails/sync", data = "<request>")]
pub async fn sync_emails(
    token: MailboxToken,
    request: Json<SyncEmailsRequest>,
    state: &State<AppState>,
) -> Result<Json<SyncEmailsResponse>, ApiError> {
    let request = request.into_inner();
    let user_id = require_user_id(&request.user_id)?;
    let (max_emails, batch_size) = state
        .sync
        .config()
        .resolve(request.max_emails, request.batch_size)
        .map_err(ApiError::BadRequest)?;
    let date_range = DateRange::parse(request.start_date.as_deref(), request.end_date.as_deref())
        .map_err(ApiError::BadRequest)?;

    let sync_request = SyncRequest {
        user_id,
        max_emails,
        batch_size,
        date_range,
    };

    let registration = state.registry.register(&sync_request.user_id);
    let cancel = registration.token();
    // Dropping this handler (client went away) cancels the run between steps.
    let disconnect_guard = cancel.clone().drop_guard();

    let engine = Arc::clone(&state.sync);
    let credentials = token.into_credentials();
    let run = tokio::spawn(async move {
        let _registration = registration;
        engine.run(&credentials, &sync_request, &cancel).await
    });

    let report = run
        .await
        .map_err(|err| ApiError::Internal(format!("sync task failed: {err}")))?;
    disconnect_guard.disarm();

    Ok(Json(report.into()))
}

/// Signal every running sync of the user to stop after its current step.
#[openapi(tag = "Emails")]
#[post("/emails/sync/cancel", data = "<request>")]
pub fn cancel_sync(request: Json<UserRequest>, state: &State<AppState>) -> Json<CancelSyncResponse> {
    let Some(user_id) = body_user_id(&request) else {
        return Json(CancelSyncResponse {
            error: Some(MISSING_USER_ID.to_string()),
            ..Default::default()
        });
    };

    let cancelled = state.registry.cancel(&user_id);
    log::info!("sync cancel: signalled {} running syncs for {}", cancelled, user_id);
    Json(CancelSyncResponse {
        success: true,
        cancelled,
        error: None,
    })
}

/// Message store counts, recomputed on every call.
#[openapi(tag = "Emails")]
#[get("/emails/sync/stats?<user_id>")]
pub async fn sync_stats(
    user_id: String,
    state: &State<AppState>,
) -> Result<Json<SyncStatsResponse>, ApiError> {
    let user_id = require_user_id(&user_id)?;
    let stats = state.store.compute_stats(&user_id).await?;

    Ok(Json(SyncStatsResponse {
        success: true,
        user_id,
        total_emails_count: stats.total_emails_count,
        processed_emails_count: stats.processed_emails_count,
        unprocessed_emails_count: stats.unprocessed_emails_count,
        last_sync_date: stats.last_sync_date,
    }))
}

/// Size of the user's namespace in the vector index.
#[openapi(tag = "Emails")]
#[get("/emails/embeddings/stats?<user_id>")]
pub async fn embedding_stats(
    user_id: String,
    state: &State<AppState>,
) -> Result<Json<EmbeddingStatsResponse>, ApiError> {
    let user_id = require_user_id(&user_id)?;
    let stats = state.index.stats(&user_id).await?;

    Ok(Json(EmbeddingStatsResponse {
        success: true,
        total_emails: stats.total_vectors,
        user_id,
        index_name: state.config.index.index_name.clone(),
        namespace: stats.namespace_name,
        dimension: stats.dimension,
    }))
}

/// Semantic search over the user's embedded mail.
#[openapi(tag = "Emails")]
#[get("/emails/embeddings/search?<query>&<user_id>&<top_k>")]
pub async fn search_embeddings(
    query: String,
    user_id: String,
    top_k: Option<usize>,
    state: &State<AppState>,
) -> Result<Json<SearchResponse>, ApiError> {
    let user_id = require_user_id(&user_id)?;
    let query = query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let failed = |error: String| SearchResponse {
        success: false,
        query: query.to_string(),
        results: Vec::new(),
        error: Some(error),
    };

    let vector = match state.embedder.embed_query(query).await {
        Ok(vector) => vector,
        Err(err) => {
            log::warn!("search: query embedding failed for {}: {}", user_id, err);
            return Ok(Json(failed(err.to_string())));
        }
    };

    let top_k = state.config.index.clamp_top_k(top_k);
    let matches = match state.index.query(&user_id, &vector, top_k, None).await {
        Ok(matches) => matches,
        Err(err) => {
            log::warn!("search: index query failed for {}: {}", user_id, err);
            return Ok(Json(failed(err.to_string())));
        }
    };

    let results = matches
        .into_iter()
        .map(|found| SearchResult {
            email_id: found.provider_message_id,
            subject: found.metadata.subject,
            from: found.metadata.from,
            to: found.metadata.to,
            date: found.metadata.date,
            snippet: found.metadata.snippet,
            similarity_score: found.similarity_score,
        })
        .collect();

    Ok(Json(SearchResponse {
        success: true,
        query: query.to_string(),
        results,
        error: None,
    }))
}

/// Drop the user's vector namespace and requeue their messages for embedding.
/// Stored messages are kept.
///
/// This deliberately raises `unprocessed_emails_count` without any ingestion:
/// every requeued message is embedded again by the next sync.
#[openapi(tag = "Emails")]
#[post("/emails/clear-embeddings", data = "<request>")]
pub async fn clear_embeddings(
    request: Json<UserRequest>,
    state: &State<AppState>,
) -> Json<ClearEmbeddingsResponse> {
    let Some(user_id) = body_user_id(&request) else {
        return Json(ClearEmbeddingsResponse {
            error: Some(MISSING_USER_ID.to_string()),
            ..Default::default()
        });
    };

    let deleted_vectors = match state.index.delete_namespace(&user_id).await {
        Ok(deleted) => deleted,
        Err(err) => {
            log::error!("clear-embeddings: index delete failed for {}: {}", user_id, err);
            return Json(ClearEmbeddingsResponse {
                error: Some(err.to_string()),
                ..Default::default()
            });
        }
    };

    match state.store.reset_processed(&user_id).await {
        Ok(requeued_emails) => {
            log::info!(
                "clear-embeddings: removed {} vectors and requeued {} emails for {}",
                deleted_vectors,
                requeued_emails,
                user_id
            );
            Json(ClearEmbeddingsResponse {
                success: true,
                deleted_vectors,
                requeued_emails,
                error: None,
            })
        }
        Err(err) => {
            log::error!("clear-embeddings: requeue failed for {}: {}", user_id, err);
            Json(ClearEmbeddingsResponse {
                deleted_vectors,
                error: Some(err.to_string()),
                ..Default::default()
            })
        }
    }
}

/// Delete every stored message of the user. The vector namespace is kept.
#[openapi(tag = "Emails")]
#[post("/emails/clear-supabase", data = "<request>")]
pub async fn clear_store(
    request: Json<UserRequest>,
    state: &State<AppState>,
) -> Json<ClearStoreResponse> {
    let Some(user_id) = body_user_id(&request) else {
        return Json(ClearStoreResponse {
            error: Some(MISSING_USER_ID.to_string()),
            ..Default::default()
        });
    };

    match state.store.clear_all(&user_id).await {
        Ok(deleted_emails) => {
            log::info!("clear-supabase: removed {} emails for {}", deleted_emails, user_id);
            Json(ClearStoreResponse {
                success: true,
                deleted_emails,
                error: None,
            })
        }
        Err(err) => {
            log::error!("clear-supabase: delete failed for {}: {}", user_id, err);
            Json(ClearStoreResponse {
                error: Some(err.to_string()),
                ..Default::default()
            })
        }
    }
}

/// Clear the message store, then the vector namespace.
///
/// The two deletes are not atomic. A failure after the first one leaves
/// orphan vectors that the next purge removes, and a re-sync overwrites them.
#[openapi(tag = "Emails")]
#[post("/emails/purge", data = "<request>")]
pub async fn purge_user(request: Json<UserRequest>, state: &State<AppState>) -> Json<PurgeResponse> {
    let Some(user_id) = body_user_id(&request) else {
        return Json(PurgeResponse {
            error: Some(MISSING_USER_ID.to_string()),
            ..Default::default()
        });
    };

    let deleted_emails = match state.store.clear_all(&user_id).await {
        Ok(deleted) => deleted,
        Err(err) => {
            log::error!("purge: message store delete failed for {}: {}", user_id, err);
            return Json(PurgeResponse {
                error: Some(err.to_string()),
                ..Default::default()
            });
        }
    };

    match state.index.delete_namespace(&user_id).await {
        Ok(deleted_vectors) => {
            log::info!(
                "purge: removed {} emails and {} vectors for {}",
                deleted_emails,
                deleted_vectors,
                user_id
            );
            Json(PurgeResponse {
                success: true,
                deleted_emails,
                deleted_vectors,
                error: None,
            })
        }
        Err(err) => {
            log::error!("purge: index delete failed for {}: {}", user_id, err);
            Json(PurgeResponse {
                deleted_emails,
                error: Some(err.to_string()),
                ..Default::default()
            })
        }
    }
}
