//! RFC 5322 message normalization.
//!
//! Turns the raw bytes returned by the provider into a [`NewMessage`]:
//! headers are decoded with `mailparse`, the body is taken from the first
//! `text/plain` part (falling back to tag-stripped HTML, then the root body),
//! and every text field is stripped of NUL bytes so Postgres can store it.
//! The raw `Date` header is kept verbatim; `sent_at` is a best-effort parse.

use crate::models::NewMessage;
use chrono::{DateTime, Utc};
use mailparse::{MailHeaderMap, ParsedMail, parse_mail};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseMessageError {
    #[error("failed to parse MIME structure: {0}")]
    MimeParse(#[from] mailparse::MailParseError),
}

/// Provider-side fields that are not part of the MIME document.
#[derive(Debug, Clone, Default)]
pub struct ProviderEnvelope {
    pub id: String,
    pub thread_id: Option<String>,
    pub label_ids: Vec<String>,
    pub snippet: String,
}

/// Sanitize text by removing NUL bytes that PostgreSQL cannot store
fn sanitize_text(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

static SCRIPT_STYLE_REGEX: OnceLock<Regex> = OnceLock::new();
static TAG_REGEX: OnceLock<Regex> = OnceLock::new();
static BLANK_LINES_REGEX: OnceLock<Regex> = OnceLock::new();

fn script_style_regex() -> &'static Regex {
    SCRIPT_STYLE_REGEX.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|head)\b.*?</(script|style|head)\s*>")
            .expect("Invalid script/style regex")
    })
}

fn tag_regex() -> &'static Regex {
    TAG_REGEX.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("Invalid tag regex"))
}

fn blank_lines_regex() -> &'static Regex {
    BLANK_LINES_REGEX.get_or_init(|| Regex::new(r"\n\s*\n\s*\n+").expect("Invalid blank line regex"))
}

/// Reduce an HTML body to readable text.
pub fn strip_html(html: &str) -> String {
    let without_blocks = script_style_regex().replace_all(html, " ");
    let with_breaks = without_blocks
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p>", "\n\n")
        .replace("</div>", "\n");
    let text = tag_regex().replace_all(&with_breaks, "");
    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let lines: Vec<&str> = decoded.lines().map(str::trim).collect();
    blank_lines_regex()
        .replace_all(lines.join("\n").trim(), "\n\n")
        .into_owned()
}

fn is_attachment(part: &ParsedMail<'_>) -> bool {
    let disposition = part.get_content_disposition();
    matches!(disposition.disposition, mailparse::DispositionType::Attachment)
}

/// Depth-first search for the first non-attachment part of `mimetype`.
fn find_part_body(part: &ParsedMail<'_>, mimetype: &str) -> Option<String> {
    if part.subparts.is_empty() {
        if part.ctype.mimetype.eq_ignore_ascii_case(mimetype) && !is_attachment(part) {
            return part.get_body().ok().filter(|body| !body.trim().is_empty());
        }
        return None;
    }

    part.subparts
        .iter()
        .find_map(|subpart| find_part_body(subpart, mimetype))
}

fn extract_body(parsed: &ParsedMail<'_>) -> String {
    if let Some(text) = find_part_body(parsed, "text/plain") {
        return text;
    }

    if let Some(html) = find_part_body(parsed, "text/html") {
        return strip_html(&html);
    }

    if parsed.subparts.is_empty() {
        parsed.get_body().unwrap_or_default()
    } else {
        String::new()
    }
}

fn parse_sent_at(raw: &str) -> Option<DateTime<Utc>> {
    if raw.trim().is_empty() {
        return None;
    }

    match dateparser::parse(raw) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(err) => {
            log::debug!("unparseable Date header `{}`: {}", raw, err);
            None
        }
    }
}

/// Parse a raw RFC 5322 message into a storable record.
///
/// Missing headers become empty strings; only a broken MIME structure is an
/// error.
pub fn parse_raw_message(
    envelope: ProviderEnvelope,
    raw: &[u8],
) -> Result<NewMessage, ParseMessageError> {
    let parsed = parse_mail(raw)?;

    let header = |name: &str| {
        parsed
            .headers
            .get_first_value(name)
            .map(|value| sanitize_text(&value))
            .unwrap_or_default()
    };

    let subject = header("Subject");
    let from = header("From");
    let to = header("To");
    let date = header("Date");
    let sent_at = parse_sent_at(&date);

    let body = sanitize_text(&extract_body(&parsed));
    let body = (!body.is_empty()).then_some(body);

    log::trace!("parsed message {} - {}", envelope.id, subject);

    Ok(NewMessage {
        provider_message_id: envelope.id,
        thread_id: envelope.thread_id.filter(|id| !id.is_empty()),
        subject,
        from,
        to,
        date,
        sent_at,
        snippet: sanitize_text(&envelope.snippet),
        body,
        label_ids: envelope.label_ids,
    })
}
