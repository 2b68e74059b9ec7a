use super::ChatConfig;
use super::generation::{ChatMessage, Generator};
use crate::models::{EMAIL_CONTENT_TYPE, ScoredMatch};
use crate::search::{Embedder, EmbeddingIndex, truncate_tokens};
use log::{info, warn};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One question about the user's indexed content.
#[derive(Debug, Clone)]
pub struct ChatQuery {
    pub user_id: String,
    pub question: String,
    /// `all`, or a content type such as `email`.
    pub content_type: String,
    pub max_context_items: Option<usize>,
    pub max_tokens_per_item: Option<usize>,
    pub truncate_context: bool,
}

/// A retrieved message supplied to the generator, returned for attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContextItem {
    pub email_id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub snippet: String,
    pub content: String,
    pub content_type: String,
    pub similarity_score: f32,
    /// True when `content` was clipped to `max_tokens_per_item`.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChatAnswer {
    pub success: bool,
    pub answer: String,
    pub question: String,
    pub content_type: String,
    pub context_items: Vec<ContextItem>,
    pub context_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ChatEngine {
    index: Arc<dyn EmbeddingIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    config: ChatConfig,
}

/// `None` searches every content type.
fn content_type_filter(content_type: &str) -> Option<String> {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "" | "all" => None,
        "email" | "emails" => Some(EMAIL_CONTENT_TYPE.to_string()),
        other => Some(other.to_string()),
    }
}

fn context_item(found: ScoredMatch, max_tokens: Option<usize>) -> ContextItem {
    let metadata = found.metadata;
    let content = if metadata.excerpt.trim().is_empty() {
        metadata.snippet.clone()
    } else {
        metadata.excerpt.clone()
    };
    let (content, truncated) = match max_tokens {
        Some(limit) => truncate_tokens(&content, limit),
        None => (content, false),
    };

    ContextItem {
        email_id: found.provider_message_id,
        subject: metadata.subject,
        from: metadata.from,
        to: metadata.to,
        date: metadata.date,
        snippet: metadata.snippet,
        content,
        content_type: metadata.content_type,
        similarity_score: found.similarity_score,
        truncated,
    }
}

/// Render retrieved items as the prompt's context block.
pub fn build_context_block(items: &[ContextItem]) -> String {
    items
        .iter()
        .map(|item| {
            format!(
                "Subject: {}\nFrom: {}\nDate: {}\nContent: {}",
                item.subject, item.from, item.date, item.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

pub fn build_system_prompt(question: &str, context: &str, content_type: &str) -> String {
    format!(
        "You are an AI assistant helping a user understand their emails. \n\
You have access to relevant emails to answer their questions.\n\n\
Emails Context:\n{context}\n\n\
User Question: {question}\n\n\
Please provide a helpful answer based on the {content_type} context above."
    )
}

impl ChatEngine {
    pub fn new(
        index: Arc<dyn EmbeddingIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        config: ChatConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            generator,
            config,
        }
    }

    fn failure(query: &ChatQuery, answer: String, error: Option<String>) -> ChatAnswer {
        ChatAnswer {
            success: false,
            answer,
            question: query.question.clone(),
            content_type: query.content_type.clone(),
            context_items: Vec::new(),
            context_used: 0,
            error,
        }
    }

    /// Retrieve, assemble context, generate. Failures come back as an answer
    /// with `success = false`, never as an error.
    pub async fn answer(&self, query: &ChatQuery) -> ChatAnswer {
        let user_id = query.user_id.as_str();
        let top_k = query
            .max_context_items
            .unwrap_or(self.config.default_max_context_items);

        let question_vector = match self.embedder.embed_query(&query.question).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!("chat: query embedding failed for {}: {}", user_id, err);
                return Self::failure(
                    query,
                    format!("Sorry, I encountered an error while processing your question: {err}"),
                    Some(err.to_string()),
                );
            }
        };

        let filter = content_type_filter(&query.content_type);
        let matches = match self
            .index
            .query(user_id, &question_vector, top_k, filter.as_deref())
            .await
        {
            Ok(matches) => matches,
            Err(err) => {
                warn!("chat: index query failed for {}: {}", user_id, err);
                return Self::failure(
                    query,
                    format!("Sorry, I encountered an error while processing your question: {err}"),
                    Some(err.to_string()),
                );
            }
        };

        if matches.is_empty() {
            return Self::failure(
                query,
                format!(
                    "I couldn't find any relevant {} to answer your question. Please try rephrasing your question or check if you have content indexed.",
                    query.content_type
                ),
                None,
            );
        }

        let max_tokens = query.truncate_context.then(|| {
            query
                .max_tokens_per_item
                .unwrap_or(self.config.default_max_tokens_per_item)
        });
        let context_items: Vec<ContextItem> = matches
            .into_iter()
            .map(|found| context_item(found, max_tokens))
            .collect();

        let context = build_context_block(&context_items);
        let messages = vec![
            ChatMessage::system(build_system_prompt(
                &query.question,
                &context,
                &query.content_type,
            )),
            ChatMessage::user(query.question.clone()),
        ];

        let context_used = context_items.len();
        match self.generator.generate(&messages).await {
            Ok(answer) => {
                info!(
                    "chat: answered for {} with {} context items",
                    user_id, context_used
                );
                ChatAnswer {
                    success: true,
                    answer,
                    question: query.question.clone(),
                    content_type: query.content_type.clone(),
                    context_items,
                    context_used,
                    error: None,
                }
            }
            Err(err) => {
                warn!("chat: generation failed for {}: {}", user_id, err);
                ChatAnswer {
                    success: false,
                    answer: format!(
                        "Sorry, I encountered an error while generating an answer: {err}"
                    ),
                    question: query.question.clone(),
                    content_type: query.content_type.clone(),
                    context_items,
                    context_used,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmbeddingMetadata;

    fn found(id: &str, excerpt: &str) -> ScoredMatch {
        ScoredMatch {
            provider_message_id: id.into(),
            metadata: EmbeddingMetadata {
                subject: "Trip".into(),
                from: "a@example.com".into(),
                snippet: "short".into(),
                excerpt: excerpt.into(),
                content_type: EMAIL_CONTENT_TYPE.into(),
                ..Default::default()
            },
            similarity_score: 0.9,
        }
    }

    #[test]
    fn content_type_all_disables_filter() {
        assert_eq!(content_type_filter("all"), None);
        assert_eq!(content_type_filter(" "), None);
        assert_eq!(content_type_filter("Emails").as_deref(), Some("email"));
        assert_eq!(content_type_filter("note").as_deref(), Some("note"));
    }

    #[test]
    fn context_items_are_clipped_only_when_requested() {
        let clipped = context_item(found("m1", "one two three four"), Some(2));
        assert_eq!(clipped.content, "one two");
        assert!(clipped.truncated);

        let full = context_item(found("m1", "one two three four"), None);
        assert_eq!(full.content, "one two three four");
        assert!(!full.truncated);
    }

    #[test]
    fn empty_excerpt_falls_back_to_snippet() {
        assert_eq!(context_item(found("m1", ""), None).content, "short");
    }

    #[test]
    fn prompt_embeds_context_and_question() {
        let items = vec![context_item(found("m1", "Flight at 9am"), None)];
        let prompt = build_system_prompt("When is my flight?", &build_context_block(&items), "emails");
        assert!(prompt.starts_with("You are an AI assistant helping a user understand their emails."));
        assert!(prompt.contains("Emails Context:\nSubject: Trip"));
        assert!(prompt.contains("Content: Flight at 9am"));
        assert!(prompt.contains("User Question: When is my flight?"));
        assert!(prompt.ends_with("based on the emails context above."));
    }
}
