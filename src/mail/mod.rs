//! Mailbox client adapter.
//!
//! The sync engine only sees the [`MailboxClient`] trait: list message ids for
//! a provider query, then fetch each message as a normalized [`NewMessage`].
//! [`GmailClient`] is the production implementation.

pub mod error;
pub mod gmail;
pub mod parser;

use crate::config::{env_duration_millis, env_string, env_usize};
use crate::models::NewMessage;
use chrono::{Days, NaiveDate};
use std::fmt;
use std::time::Duration;

pub use error::TransportError;
pub use gmail::GmailClient;

/// Capability token for one mailbox, passed on every adapter call.
#[derive(Clone, PartialEq, Eq)]
pub struct MailboxCredentials {
    access_token: String,
}

impl MailboxCredentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for MailboxCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MailboxCredentials(<redacted>)")
    }
}

/// One page of message ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

#[rocket::async_trait]
pub trait MailboxClient: Send + Sync {
    async fn list_messages(
        &self,
        credentials: &MailboxCredentials,
        query: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, TransportError>;

    async fn get_message(
        &self,
        credentials: &MailboxCredentials,
        id: &str,
    ) -> Result<NewMessage, TransportError>;
}

#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub api_url: String,
    pub base_query: String,
    pub request_timeout: Duration,
    pub fetch_concurrency: usize,
}

impl MailboxConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: env_string(
                "MAILBOX_API_URL",
                "https://gmail.googleapis.com/gmail/v1/users/me",
            ),
            base_query: env_string("MAILBOX_BASE_QUERY", "category:primary"),
            request_timeout: env_duration_millis("MAILBOX_TIMEOUT_MS", 20_000),
            fetch_concurrency: env_usize("MAILBOX_FETCH_CONCURRENCY", 4).max(1),
        }
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Inclusive calendar date range used to narrow a sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Parse optional `YYYY/MM/DD` (or `YYYY-MM-DD`) bounds. Blank strings
    /// count as absent.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, String> {
        let range = Self {
            start: present(start).map(parse_filter_date).transpose()?,
            end: present(end).map(parse_filter_date).transpose()?,
        };

        if let (Some(start), Some(end)) = (range.start, range.end) {
            if start > end {
                return Err(format!(
                    "start_date {} is after end_date {}",
                    start.format("%Y/%m/%d"),
                    end.format("%Y/%m/%d")
                ));
            }
        }

        Ok(range)
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|value| !value.is_empty())
}

fn parse_filter_date(raw: &str) -> Result<NaiveDate, String> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y/%m/%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .map_err(|_| format!("invalid date `{trimmed}`, expected YYYY/MM/DD"))
}

/// Provider search query for a sync run.
///
/// Gmail's `before:` is exclusive, so the end bound is moved one day forward
/// to keep the caller's range inclusive.
pub fn build_query(base_query: &str, range: &DateRange) -> String {
    let mut parts: Vec<String> = Vec::new();

    let base = base_query.trim();
    if !base.is_empty() {
        parts.push(base.to_string());
    }

    if let Some(start) = range.start {
        parts.push(format!("after:{}", start.format("%Y/%m/%d")));
    }

    if let Some(end) = range.end {
        let exclusive = end.checked_add_days(Days::new(1)).unwrap_or(end);
        parts.push(format!("before:{}", exclusive.format("%Y/%m/%d")));
    }

    parts.join(" ")
}
