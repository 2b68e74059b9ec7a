use super::config::{EmbeddingApi, EmbeddingConfig};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while interacting with the embeddings service.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("embedding service returned status {status}: {body}")]
    Service { status: StatusCode, body: String },
    #[error("failed to decode embedding response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("embedding response count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("embedding vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding service rejected input: {0}")]
    Rejected(String),
}

/// Anything that turns text into vectors of a fixed dimension.
#[rocket::async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    /// One vector per document, in input order.
    async fn embed_documents(&self, documents: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vectors = self.embed_documents(&[query.to_string()]).await?;
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
}

#[derive(Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("lifeos-server/0.1")
            .build()
            .map_err(EmbeddingError::Http)?;

        Ok(Self {
            http: client,
            config,
        })
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    /// TEI exposes `/health`; hosted OpenAI-compatible APIs have no equivalent.
    pub async fn healthcheck(&self) -> Result<(), EmbeddingError> {
        if self.config.api != EmbeddingApi::Tei {
            return Ok(());
        }

        let url = format!("{}/health", self.config.base_url.trim_end_matches('/'));
        let response = self.http.get(url).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(EmbeddingError::Service { status, body })
        }
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match self.config.api {
            EmbeddingApi::OpenAi => format!("{base}/embeddings"),
            EmbeddingApi::Tei => format!("{base}/embed"),
        }
    }

    fn request_body(&self, chunk: &[String]) -> EmbeddingRequest {
        match self.config.api {
            EmbeddingApi::OpenAi => EmbeddingRequest::OpenAi {
                model: self.config.model_id.clone(),
                input: chunk.to_vec(),
            },
            EmbeddingApi::Tei => EmbeddingRequest::Tei {
                inputs: chunk.to_vec(),
                truncate: Some(true),
                normalize: Some(self.config.normalize),
            },
        }
    }

    async fn embed_chunk(&self, chunk: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self.http.post(self.endpoint()).json(&self.request_body(chunk));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
                return Err(EmbeddingError::Rejected(body));
            }
            return Err(EmbeddingError::Service { status, body });
        }

        let body = response.bytes().await?;
        let parsed: EmbeddingResponse = serde_json::from_slice(&body)?;
        let embeddings = parsed.into_embeddings();

        if embeddings.len() != chunk.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: chunk.len(),
                actual: embeddings.len(),
            });
        }

        for embedding in &embeddings {
            if embedding.len() != self.config.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: embedding.len(),
                });
            }
        }

        Ok(embeddings)
    }
}

#[rocket::async_trait]
impl Embedder for EmbeddingClient {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed_documents(&self, documents: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(documents.len());
        for chunk in documents.chunks(self.config.batch_size.max(1)) {
            results.extend(self.embed_chunk(chunk).await?);
        }

        Ok(results)
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum EmbeddingRequest {
    OpenAi {
        model: String,
        input: Vec<String>,
    },
    Tei {
        inputs: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        truncate: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        normalize: Option<bool>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Bare(Vec<Vec<f32>>),
    Wrapped { embeddings: Vec<Vec<f32>> },
    OpenAi { data: Vec<EmbeddingData> },
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Bare(values) => values,
            EmbeddingResponse::Wrapped { embeddings } => embeddings,
            EmbeddingResponse::OpenAi { mut data } => {
                data.sort_by_key(|entry| entry.index);
                data.into_iter().map(|entry| entry.embedding).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_response_is_reordered_by_index() {
        let body = r#"{"object":"list","data":[
            {"object":"embedding","index":1,"embedding":[0.0,1.0]},
            {"object":"embedding","index":0,"embedding":[1.0,0.0]}
        ],"model":"text-embedding-ada-002"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.into_embeddings(), vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn tei_bare_and_wrapped_responses_decode() {
        let bare: EmbeddingResponse = serde_json::from_str("[[0.5,0.5]]").unwrap();
        assert_eq!(bare.into_embeddings(), vec![vec![0.5, 0.5]]);

        let wrapped: EmbeddingResponse =
            serde_json::from_str(r#"{"embeddings":[[0.25,0.75]]}"#).unwrap();
        assert_eq!(wrapped.into_embeddings(), vec![vec![0.25, 0.75]]);
    }

    #[test]
    fn request_shape_follows_configured_api() {
        let openai = serde_json::to_value(EmbeddingRequest::OpenAi {
            model: "m".into(),
            input: vec!["hi".into()],
        })
        .unwrap();
        assert_eq!(openai["input"][0], "hi");
        assert_eq!(openai["model"], "m");

        let tei = serde_json::to_value(EmbeddingRequest::Tei {
            inputs: vec!["hi".into()],
            truncate: Some(true),
            normalize: None,
        })
        .unwrap();
        assert_eq!(tei["inputs"][0], "hi");
        assert!(tei.get("normalize").is_none());
    }
}
