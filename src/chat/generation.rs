use crate::config::{env_duration_millis, env_f32, env_secret, env_string};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("generation service returned status {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("generation service returned no choices")]
    EmptyResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Black-box text completion.
#[rocket::async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, GenerationError>;
}

#[derive(Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl GenerationConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string("GENERATION_URL", "https://api.openai.com/v1"),
            model: env_string("GENERATION_MODEL", "gpt-3.5-turbo"),
            api_key: env_secret(&["GENERATION_API_KEY", "OPENAI_API_KEY"]),
            temperature: env_f32("GENERATION_TEMPERATURE", 0.1).clamp(0.0, 2.0),
            request_timeout: env_duration_millis("GENERATION_TIMEOUT_MS", 60_000),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `chat/completions` client.
#[derive(Clone)]
pub struct OpenAiGenerator {
    http: reqwest::Client,
    config: GenerationConfig,
}

impl OpenAiGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("lifeos-server/0.1")
            .build()?;

        Ok(Self { http, config })
    }
}

#[rocket::async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        let body = OpenAiRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            stream: false,
        };

        let mut request = self
            .http
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .json(&body);

        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api { status, message });
        }

        let data: OpenAiResponse = response.json().await?;
        data.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(GenerationError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_in_openai_shape() {
        let messages = vec![ChatMessage::system("ctx"), ChatMessage::user("q")];
        let value = serde_json::to_value(OpenAiRequest {
            model: "gpt-3.5-turbo",
            messages: &messages,
            temperature: 0.1,
            stream: false,
        })
        .unwrap();

        assert_eq!(value["model"], "gpt-3.5-turbo");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "q");
        assert_eq!(value["stream"], false);
    }

    #[test]
    fn null_content_is_treated_as_empty_response() {
        let parsed: OpenAiResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)
                .unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
