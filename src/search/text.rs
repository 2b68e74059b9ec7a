use crate::models::{EMAIL_CONTENT_TYPE, EmbeddingMetadata, Message};

/// Characters of message content fed to the embedding model.
pub const MAX_EMBEDDING_CONTENT_CHARS: usize = 8_000;

/// Characters of body kept in the index metadata for context assembly.
pub const EXCERPT_CHARS: usize = 1_000;

const NO_SUBJECT: &str = "(No Subject)";

/// Build the canonical text used for message embeddings.
///
/// `Subject`, `From` and `Content` lines; content is the body with blank
/// runs collapsed, or the snippet when the body is empty.
pub fn build_message_embedding_text(message: &Message) -> String {
    let subject = message.subject.trim();
    let subject = if subject.is_empty() { NO_SUBJECT } else { subject };

    let mut parts = vec![format!("Subject: {subject}")];

    let from = message.from.trim();
    if !from.is_empty() {
        parts.push(format!("From: {from}"));
    }

    let content = message_content(message);
    if !content.is_empty() {
        parts.push(format!(
            "Content: {}",
            truncate_chars(&content, MAX_EMBEDDING_CONTENT_CHARS)
        ));
    }

    parts.join("\n")
}

/// Metadata stored next to the vector.
pub fn build_embedding_metadata(message: &Message) -> EmbeddingMetadata {
    let subject = message.subject.trim();
    EmbeddingMetadata {
        subject: if subject.is_empty() {
            NO_SUBJECT.to_string()
        } else {
            subject.to_string()
        },
        from: message.from.clone(),
        to: message.to.clone(),
        date: message.date.clone(),
        snippet: message.snippet.clone(),
        excerpt: truncate_chars(&message_content(message), EXCERPT_CHARS).to_string(),
        content_type: EMAIL_CONTENT_TYPE.to_string(),
    }
}

fn message_content(message: &Message) -> String {
    let body = message
        .body
        .as_deref()
        .map(|body| normalize_whitespace(body.trim()))
        .unwrap_or_default();

    if body.is_empty() {
        message.snippet.trim().to_string()
    } else {
        body
    }
}

/// Prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Clip `text` to `max_tokens` whitespace-separated tokens.
///
/// Returns the clipped text and whether anything was dropped.
pub fn truncate_tokens(text: &str, max_tokens: usize) -> (String, bool) {
    let mut tokens = text.split_whitespace();
    let kept: Vec<&str> = tokens.by_ref().take(max_tokens).collect();
    let truncated = tokens.next().is_some();
    if truncated {
        (kept.join(" "), true)
    } else {
        (text.to_string(), false)
    }
}

fn normalize_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut previous_was_blank = false;

    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            if !previous_was_blank && !normalized.is_empty() {
                normalized.push('\n');
            }
            previous_was_blank = true;
            continue;
        }

        normalized.push_str(trimmed);
        normalized.push('\n');
        previous_was_blank = false;
    }

    while normalized.ends_with('\n') {
        normalized.pop();
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMessage;
    use chrono::Utc;

    fn message(subject: &str, body: Option<&str>, snippet: &str) -> Message {
        Message::from_new(
            "u1",
            NewMessage {
                provider_message_id: "m1".into(),
                subject: subject.into(),
                from: "Alice <alice@example.com>".into(),
                snippet: snippet.into(),
                body: body.map(str::to_string),
                ..Default::default()
            },
            Utc::now(),
        )
    }

    #[test]
    fn embedding_text_has_subject_from_and_content() {
        let text = build_message_embedding_text(&message(
            "Quarterly report",
            Some("Hello\n\n\n\nNumbers attached.  \n"),
            "Hello",
        ));
        assert_eq!(
            text,
            "Subject: Quarterly report\nFrom: Alice <alice@example.com>\nContent: Hello\n\nNumbers attached."
        );
    }

    #[test]
    fn empty_body_falls_back_to_snippet_and_missing_subject_is_labelled() {
        let text = build_message_embedding_text(&message("  ", Some("   "), "short preview"));
        assert!(text.starts_with("Subject: (No Subject)\n"));
        assert!(text.ends_with("Content: short preview"));
    }

    #[test]
    fn content_is_capped() {
        let body = "é".repeat(MAX_EMBEDDING_CONTENT_CHARS + 50);
        let text = build_message_embedding_text(&message("s", Some(&body), ""));
        let content = text.split("Content: ").nth(1).unwrap();
        assert_eq!(content.chars().count(), MAX_EMBEDDING_CONTENT_CHARS);
    }

    #[test]
    fn metadata_carries_excerpt_and_content_type() {
        let body = "word ".repeat(400);
        let metadata = build_embedding_metadata(&message("s", Some(&body), "snip"));
        assert_eq!(metadata.excerpt.chars().count(), EXCERPT_CHARS);
        assert_eq!(metadata.content_type, EMAIL_CONTENT_TYPE);
        assert_eq!(metadata.snippet, "snip");
    }

    #[test]
    fn token_truncation_counts_whitespace_tokens() {
        assert_eq!(truncate_tokens("a b  c d", 2), ("a b".to_string(), true));
        assert_eq!(truncate_tokens("a b", 2), ("a b".to_string(), false));
        assert_eq!(truncate_tokens("", 3), (String::new(), false));
    }
}
