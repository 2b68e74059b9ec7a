//! Per-request ingestion pipeline: mailbox -> message store -> vector index.

use super::SyncConfig;
use crate::mail::{DateRange, MailboxClient, MailboxCredentials, TransportError, build_query};
use crate::models::{Message, NewMessage};
use crate::search::{
    Embedder, EmbeddingError, EmbeddingIndex, build_embedding_metadata,
    build_message_embedding_text,
};
use crate::store::{MessageStore, StorageError};
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Validated parameters for one sync invocation.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub user_id: String,
    /// Cap on messages listed from the mailbox. Zero runs only the embedding pass.
    pub max_emails: usize,
    /// Page size for mailbox listing and embedding batches.
    pub batch_size: usize,
    pub date_range: DateRange,
}

/// Counts reported by every sync, including aborted and cancelled ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SyncReport {
    /// Message ids listed from the mailbox in this run.
    pub fetched_emails_count: usize,
    /// Rows inserted into the message store in this run.
    pub new_emails_count: usize,
    /// Same as `new_emails_count`; kept for clients reading the store count separately.
    pub stored_emails_count: usize,
    /// Listed ids that were already stored.
    pub skipped_duplicate_count: usize,
    /// Messages that could not be fetched or parsed and were skipped.
    pub fetch_failures_count: usize,
    pub total_emails_count: i64,
    /// Stored messages that have a vector in the index.
    pub indexed_emails_count: i64,
    pub unprocessed_emails_count: i64,
    /// Messages embedded and marked processed in this run.
    pub embedded_emails_count: usize,
    /// Messages whose embedding failed in this run; they stay unprocessed.
    pub failed_embeddings_count: usize,
    pub cancelled: bool,
    /// False when the run was cut short by cancellation, an abort or the iteration cap.
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Error)]
enum SyncAbort {
    #[error("mailbox listing failed: {0}")]
    Transport(#[from] TransportError),
    #[error("message store failed: {0}")]
    Storage(#[from] StorageError),
}

enum ItemOutcome {
    Embedded,
    Failed(String),
    Skipped,
}

pub struct SyncEngine {
    mailbox: Arc<dyn MailboxClient>,
    store: Arc<dyn MessageStore>,
    index: Arc<dyn EmbeddingIndex>,
    embedder: Arc<dyn Embedder>,
    config: SyncConfig,
    base_query: String,
    fetch_concurrency: usize,
}

impl SyncEngine {
    pub fn new(
        mailbox: Arc<dyn MailboxClient>,
        store: Arc<dyn MessageStore>,
        index: Arc<dyn EmbeddingIndex>,
        embedder: Arc<dyn Embedder>,
        config: SyncConfig,
    ) -> Self {
        Self {
            mailbox,
            store,
            index,
            embedder,
            config,
            base_query: "category:primary".to_string(),
            fetch_concurrency: 4,
        }
    }

    pub fn with_base_query(mut self, base_query: impl Into<String>) -> Self {
        self.base_query = base_query.into();
        self
    }

    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency.max(1);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run ingestion then the embedding pass. Never fails: aborts are reported
    /// in [`SyncReport::error`] next to the counts reached so far.
    pub async fn run(
        &self,
        credentials: &MailboxCredentials,
        request: &SyncRequest,
        cancel: &CancellationToken,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let user_id = request.user_id.as_str();

        info!(
            "sync: starting for {} (max_emails={}, batch_size={})",
            user_id, request.max_emails, request.batch_size
        );

        let mut outcome = self.ingest(credentials, request, cancel, &mut report).await;

        if outcome.is_ok() && !report.cancelled {
            outcome = self
                .embed_pending(user_id, request.batch_size, cancel, &mut report)
                .await
                .map_err(SyncAbort::from);
        }

        if let Err(abort) = outcome {
            error!("sync: aborted for {}: {}", user_id, abort);
            report.error = Some(abort.to_string());
            report.completed = false;
        }

        match self.store.compute_stats(user_id).await {
            Ok(stats) => {
                report.total_emails_count = stats.total_emails_count;
                report.indexed_emails_count = stats.processed_emails_count;
                report.unprocessed_emails_count = stats.unprocessed_emails_count;
            }
            Err(err) => {
                warn!("sync: could not compute stats for {}: {}", user_id, err);
                report.completed = false;
                report.error.get_or_insert_with(|| err.to_string());
            }
        }

        info!(
            "sync: finished for {}: fetched={} new={} embedded={} failed={} total={} unprocessed={} cancelled={}",
            user_id,
            report.fetched_emails_count,
            report.new_emails_count,
            report.embedded_emails_count,
            report.failed_embeddings_count,
            report.total_emails_count,
            report.unprocessed_emails_count,
            report.cancelled
        );

        report
    }

    async fn ingest(
        &self,
        credentials: &MailboxCredentials,
        request: &SyncRequest,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), SyncAbort> {
        let user_id = request.user_id.as_str();
        let query = build_query(&self.base_query, &request.date_range);
        let mut remaining = request.max_emails;
        let mut page_token: Option<String> = None;

        while remaining > 0 {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }

            let page_size = request.batch_size.min(remaining);
            let page = self
                .mailbox
                .list_messages(credentials, &query, page_size, page_token.as_deref())
                .await?;

            let ids: Vec<String> = page.ids.into_iter().take(remaining).collect();
            if ids.is_empty() {
                break;
            }
            remaining -= ids.len();
            report.fetched_emails_count += ids.len();

            let known = self.store.known_ids(user_id, &ids).await?;
            let fresh: Vec<String> = ids.into_iter().filter(|id| !known.contains(id)).collect();
            report.skipped_duplicate_count += known.len();

            let (messages, rejected) = self.fetch_messages(credentials, fresh, cancel, report).await;
            let result = self.store.upsert_messages(user_id, &messages).await?;
            report.new_emails_count += result.inserted_count;
            report.stored_emails_count += result.inserted_count;
            report.skipped_duplicate_count += result.skipped_duplicate_count;

            debug!(
                "sync: page for {}: {} listed, {} inserted, {} remaining",
                user_id,
                messages.len() + known.len(),
                result.inserted_count,
                remaining
            );

            if let Some(err) = rejected {
                return Err(SyncAbort::Transport(err));
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
        }

        Ok(())
    }

    /// Fetch full messages with bounded concurrency, keeping provider order.
    ///
    /// A message that fails to fetch is logged and skipped. An authorization
    /// failure is returned next to the messages that did load, so the caller
    /// can persist them before aborting.
    async fn fetch_messages(
        &self,
        credentials: &MailboxCredentials,
        ids: Vec<String>,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> (Vec<NewMessage>, Option<TransportError>) {
        let mut fetched: Vec<(usize, Result<NewMessage, TransportError>)> =
            stream::iter(ids.into_iter().enumerate())
                .filter(|_| std::future::ready(!cancel.is_cancelled()))
                .map(|(position, id)| async move {
                    (position, self.mailbox.get_message(credentials, &id).await)
                })
                .buffer_unordered(self.fetch_concurrency)
                .collect()
                .await;
        fetched.sort_by_key(|(position, _)| *position);

        let mut messages = Vec::with_capacity(fetched.len());
        let mut rejected = None;
        for (_, result) in fetched {
            match result {
                Ok(message) => messages.push(message),
                Err(TransportError::Unauthorized) => rejected = Some(TransportError::Unauthorized),
                Err(err) => {
                    warn!("sync: skipping message: {}", err);
                    report.fetch_failures_count += 1;
                }
            }
        }

        (messages, rejected)
    }

    /// Embed unprocessed messages until none are left, the run is cancelled or
    /// the iteration cap is reached. Messages that fail are excluded for the
    /// rest of this run and retried by the next one.
    pub async fn embed_pending(
        &self,
        user_id: &str,
        batch_size: usize,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), StorageError> {
        let batch_size = batch_size.max(1);
        let mut failed: HashSet<String> = HashSet::new();
        report.completed = false;

        for iteration in 0..self.config.max_embed_iterations {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }

            let pending: Vec<Message> = self
                .store
                .list_unprocessed(user_id, batch_size + failed.len())
                .await?
                .into_iter()
                .filter(|message| !failed.contains(&message.provider_message_id))
                .take(batch_size)
                .collect();

            if pending.is_empty() {
                report.completed = true;
                return Ok(());
            }

            debug!(
                "sync: embedding batch {} of {} messages for {}",
                iteration + 1,
                pending.len(),
                user_id
            );

            for outcome in self.embed_batch(user_id, pending, cancel).await? {
                match outcome {
                    ItemOutcome::Embedded => report.embedded_emails_count += 1,
                    ItemOutcome::Failed(id) => {
                        failed.insert(id);
                    }
                    ItemOutcome::Skipped => {}
                }
            }
            report.failed_embeddings_count = failed.len();
        }

        warn!(
            "sync: embedding for {} stopped after {} iterations",
            user_id, self.config.max_embed_iterations
        );
        Ok(())
    }

    async fn embed_batch(
        &self,
        user_id: &str,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ItemOutcome>, StorageError> {
        let texts: Vec<String> = messages.iter().map(build_message_embedding_text).collect();
        let vectors = self.embed_texts(&texts).await;

        let outcomes: Vec<Result<ItemOutcome, StorageError>> = stream::iter(messages.into_iter().zip(vectors))
            .map(|(message, vector)| self.store_embedding(user_id, message, vector, cancel))
            .buffer_unordered(self.config.embed_concurrency.max(1))
            .collect()
            .await;

        outcomes.into_iter().collect()
    }

    /// One result per text. A failed batch call falls back to per-text calls so
    /// one bad input does not fail its siblings.
    async fn embed_texts(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        match self.embedder.embed_documents(texts).await {
            Ok(vectors) if vectors.len() == texts.len() => {
                return vectors.into_iter().map(Ok).collect();
            }
            Ok(vectors) => warn!(
                "sync: embedder returned {} vectors for {} texts, retrying one by one",
                vectors.len(),
                texts.len()
            ),
            Err(err) if texts.len() > 1 => {
                warn!("sync: batch embedding failed ({}), retrying one by one", err)
            }
            Err(err) => return vec![Err(err)],
        }

        stream::iter(texts.to_vec())
            .map(|text| async move { self.embed_one(&text).await })
            .buffered(self.config.embed_concurrency.max(1))
            .collect()
            .await
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vectors = self
            .embedder
            .embed_documents(&[text.to_string()])
            .await?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual: vectors.len(),
            });
        }
        vectors
            .into_iter()
            .next()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }

    /// Write one vector then flag the message processed, in that order.
    async fn store_embedding(
        &self,
        user_id: &str,
        message: Message,
        vector: Result<Vec<f32>, EmbeddingError>,
        cancel: &CancellationToken,
    ) -> Result<ItemOutcome, StorageError> {
        if cancel.is_cancelled() {
            return Ok(ItemOutcome::Skipped);
        }

        let id = message.provider_message_id.clone();
        let vector = match vector {
            Ok(vector) => vector,
            Err(err) => {
                warn!("sync: embedding failed for message {}: {}", id, err);
                return Ok(ItemOutcome::Failed(id));
            }
        };

        let metadata = build_embedding_metadata(&message);
        if let Err(err) = self
            .index
            .upsert_vector(user_id, &id, &vector, &metadata)
            .await
        {
            if err.is_item_scoped() {
                warn!("sync: index rejected message {}: {}", id, err);
            } else {
                error!("sync: index upsert failed for message {}: {}", id, err);
            }
            return Ok(ItemOutcome::Failed(id));
        }

        self.store.mark_processed(user_id, &id).await?;
        Ok(ItemOutcome::Embedded)
    }
}
