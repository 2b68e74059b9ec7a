//! Mailbox synchronization.
//!
//! A sync is invoked per request with bounded work and runs in two phases:
//!
//! 1. **Ingest**: page through the mailbox with the provider query built from
//!    the date filter, skip ids that are already stored, fetch the rest and
//!    insert them idempotently. A failed page aborts the run; prior pages stay
//!    persisted.
//! 2. **Embed**: drain unprocessed messages `batch_size` at a time. A message
//!    is flagged processed only after its vector is in the index; failures
//!    leave it unprocessed for the next run.
//!
//! Cancellation is cooperative and checked between pages and between
//! messages. The embedding loop is also bounded by an iteration cap.

pub mod engine;
pub mod registry;

use crate::config::env_usize;

pub use engine::{SyncEngine, SyncReport, SyncRequest};
pub use registry::{SyncRegistration, SyncRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub default_max_emails: usize,
    pub max_emails_limit: usize,
    pub default_batch_size: usize,
    pub max_batch_size: usize,
    pub embed_concurrency: usize,
    pub max_embed_iterations: usize,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let max_emails_limit = env_usize("SYNC_MAX_EMAILS_LIMIT", 500);
        let max_batch_size = env_usize("SYNC_MAX_BATCH_SIZE", 100).max(1);
        Self {
            default_max_emails: env_usize("SYNC_DEFAULT_MAX_EMAILS", 50).min(max_emails_limit),
            max_emails_limit,
            default_batch_size: env_usize("SYNC_DEFAULT_BATCH_SIZE", 10).clamp(1, max_batch_size),
            max_batch_size,
            embed_concurrency: env_usize("SYNC_EMBED_CONCURRENCY", 4).max(1),
            max_embed_iterations: env_usize("SYNC_MAX_EMBED_ITERATIONS", 50),
        }
    }

    /// Apply defaults and limits to caller supplied sizes.
    ///
    /// `max_emails` above the limit is clamped; a zero `batch_size` is rejected.
    pub fn resolve(
        &self,
        max_emails: Option<usize>,
        batch_size: Option<usize>,
    ) -> Result<(usize, usize), String> {
        let max_emails = max_emails
            .unwrap_or(self.default_max_emails)
            .min(self.max_emails_limit);
        let batch_size = match batch_size {
            Some(0) => return Err("batch_size must be at least 1".to_string()),
            Some(size) => size.min(self.max_batch_size),
            None => self.default_batch_size,
        };
        Ok((max_emails, batch_size))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
