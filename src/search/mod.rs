//! Embedding generation and the per-user vector index.

pub mod client;
pub mod config;
pub mod error;
pub mod index;
pub mod memory;
pub mod postgres;
pub mod text;

pub use client::{Embedder, EmbeddingClient, EmbeddingError};
pub use config::{EmbeddingApi, EmbeddingConfig, IndexConfig};
pub use error::IndexError;
pub use index::{EmbeddingIndex, cosine_similarity, rank_top_k};
pub use memory::MemoryVectorIndex;
pub use postgres::PgVectorIndex;
pub use text::{build_embedding_metadata, build_message_embedding_text, truncate_tokens};
