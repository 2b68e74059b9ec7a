//! Retrieval-augmented question answering over the user's indexed email.

pub mod generation;
pub mod service;

use crate::config::env_usize;

pub use generation::{ChatMessage, GenerationConfig, GenerationError, Generator, OpenAiGenerator};
pub use service::{ChatAnswer, ChatEngine, ChatQuery, ContextItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    pub default_max_context_items: usize,
    pub default_max_tokens_per_item: usize,
}

impl ChatConfig {
    pub fn from_env() -> Self {
        Self {
            default_max_context_items: env_usize("CHAT_DEFAULT_MAX_CONTEXT_ITEMS", 25),
            default_max_tokens_per_item: env_usize("CHAT_DEFAULT_MAX_TOKENS_PER_ITEM", 200),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
