//! Shared services handed to the route handlers through Rocket managed state.

use crate::chat::{ChatConfig, ChatEngine, Generator};
use crate::mail::{MailboxClient, MailboxConfig};
use crate::search::{Embedder, EmbeddingIndex, IndexConfig};
use crate::store::MessageStore;
use crate::sync::{SyncConfig, SyncEngine, SyncRegistry};
use std::sync::Arc;

/// External collaborators, behind the trait seams the engines consume.
#[derive(Clone)]
pub struct Backends {
    pub mailbox: Arc<dyn MailboxClient>,
    pub store: Arc<dyn MessageStore>,
    pub index: Arc<dyn EmbeddingIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
}

/// Typed configuration for everything above the connection pool.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub index: IndexConfig,
    pub mailbox: MailboxConfig,
    pub sync: SyncConfig,
    pub chat: ChatConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            index: IndexConfig::from_env(),
            mailbox: MailboxConfig::from_env(),
            sync: SyncConfig::from_env(),
            chat: ChatConfig::from_env(),
        }
    }
}

pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub index: Arc<dyn EmbeddingIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub sync: Arc<SyncEngine>,
    pub chat: Arc<ChatEngine>,
    pub registry: SyncRegistry,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(backends: Backends, config: AppConfig) -> Self {
        let sync = SyncEngine::new(
            backends.mailbox,
            Arc::clone(&backends.store),
            Arc::clone(&backends.index),
            Arc::clone(&backends.embedder),
            config.sync.clone(),
        )
        .with_base_query(config.mailbox.base_query.clone())
        .with_fetch_concurrency(config.mailbox.fetch_concurrency);

        let chat = ChatEngine::new(
            Arc::clone(&backends.index),
            Arc::clone(&backends.embedder),
            backends.generator,
            config.chat.clone(),
        );

        Self {
            store: backends.store,
            index: backends.index,
            embedder: backends.embedder,
            sync: Arc::new(sync),
            chat: Arc::new(chat),
            registry: SyncRegistry::new(),
            config,
        }
    }
}
