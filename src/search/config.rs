use crate::config::{env_bool, env_duration_millis, env_secret, env_string, env_usize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Wire format spoken by the embeddings service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingApi {
    /// OpenAI-compatible `POST {base}/embeddings` with `{model, input}`.
    #[default]
    OpenAi,
    /// Hugging Face text-embeddings-inference `POST {base}/embed` with `{inputs}`.
    Tei,
}

impl FromStr for EmbeddingApi {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(EmbeddingApi::OpenAi),
            "tei" => Ok(EmbeddingApi::Tei),
            other => Err(format!("unknown embeddings api `{other}`")),
        }
    }
}

/// Configuration for the embeddings service client.
#[derive(Clone)]
pub struct EmbeddingConfig {
    pub api: EmbeddingApi,
    pub base_url: String,
    pub model_id: String,
    pub api_key: Option<String>,
    pub dimension: usize,
    pub batch_size: usize,
    pub request_timeout: Duration,
    /// Ask TEI servers to L2-normalize vectors. Ignored by OpenAI.
    pub normalize: bool,
}

impl EmbeddingConfig {
    pub fn from_env() -> Self {
        let api = std::env::var("EMBEDDINGS_API")
            .ok()
            .and_then(|value| EmbeddingApi::from_str(&value).ok())
            .unwrap_or_default();

        Self {
            api,
            base_url: env_string("EMBEDDINGS_URL", "https://api.openai.com/v1"),
            model_id: env_string("EMBEDDINGS_MODEL_ID", "text-embedding-ada-002"),
            api_key: env_secret(&["EMBEDDINGS_API_KEY", "OPENAI_API_KEY"]),
            dimension: env_usize("EMBEDDINGS_DIM", 1536),
            batch_size: env_usize("EMBEDDINGS_BATCH_SIZE", 32),
            request_timeout: env_duration_millis("EMBEDDINGS_TIMEOUT_MS", 30_000),
            normalize: env_bool("EMBEDDINGS_NORMALIZE", true),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("api", &self.api)
            .field("base_url", &self.base_url)
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .field("request_timeout", &self.request_timeout)
            .field("normalize", &self.normalize)
            .finish()
    }
}

/// Vector index settings shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    pub index_name: String,
    pub dimension: usize,
    pub max_top_k: usize,
    pub default_top_k: usize,
}

impl IndexConfig {
    pub fn from_env() -> Self {
        let max_top_k = env_usize("INDEX_MAX_TOP_K", 50).max(1);
        Self {
            index_name: env_string("INDEX_NAME", "lifeos-emails"),
            dimension: env_usize("EMBEDDINGS_DIM", 1536),
            max_top_k,
            default_top_k: env_usize("INDEX_DEFAULT_TOP_K", 5).clamp(1, max_top_k),
        }
    }

    /// Clamp a caller supplied `top_k` into `1..=max_top_k`.
    pub fn clamp_top_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_top_k)
            .clamp(1, self.max_top_k.max(1))
    }

    /// Name of the per-user partition, e.g. `lifeos-emails:alice`.
    pub fn namespace_name(&self, user_id: &str) -> String {
        format!("{}:{}", self.index_name, user_id)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_config() -> IndexConfig {
        IndexConfig {
            index_name: "lifeos-emails".into(),
            dimension: 3,
            max_top_k: 50,
            default_top_k: 5,
        }
    }

    #[test]
    fn top_k_is_clamped_to_configured_bounds() {
        let config = index_config();
        assert_eq!(config.clamp_top_k(None), 5);
        assert_eq!(config.clamp_top_k(Some(0)), 1);
        assert_eq!(config.clamp_top_k(Some(12)), 12);
        assert_eq!(config.clamp_top_k(Some(5_000)), 50);
    }

    #[test]
    fn namespace_is_scoped_by_user() {
        assert_eq!(index_config().namespace_name("u1"), "lifeos-emails:u1");
    }

    #[test]
    fn embedding_api_parses_case_insensitively() {
        assert_eq!("TEI".parse::<EmbeddingApi>(), Ok(EmbeddingApi::Tei));
        assert_eq!("openai".parse::<EmbeddingApi>(), Ok(EmbeddingApi::OpenAi));
        assert!("pinecone".parse::<EmbeddingApi>().is_err());
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = EmbeddingConfig {
            api: EmbeddingApi::OpenAi,
            base_url: "http://localhost".into(),
            model_id: "m".into(),
            api_key: Some("sk-secret".into()),
            dimension: 3,
            batch_size: 8,
            request_timeout: Duration::from_secs(1),
            normalize: true,
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
