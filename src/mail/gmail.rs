use super::error::TransportError;
use super::parser::{ProviderEnvelope, parse_raw_message};
use super::{MailboxClient, MailboxConfig, MailboxCredentials, MessagePage};
use crate::models::NewMessage;
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use serde::Deserialize;
use std::time::Duration;

/// Gmail pads `raw` inconsistently; accept both forms.
const RAW_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Gmail REST adapter (`users.messages.list` / `users.messages.get?format=raw`).
#[derive(Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct MessageIndex {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Option<Vec<MessageIndex>>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    #[serde(rename = "threadId", default)]
    thread_id: Option<String>,
    #[serde(rename = "labelIds", default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    raw: Option<String>,
}

impl GmailClient {
    pub fn new(config: &MailboxConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("lifeos-server/0.1")
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        credentials: &MailboxCredentials,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, TransportError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(credentials.access_token())
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status, body));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| TransportError::Decode(err.to_string()))
    }
}

#[rocket::async_trait]
impl MailboxClient for GmailClient {
    async fn list_messages(
        &self,
        credentials: &MailboxCredentials,
        query: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, TransportError> {
        let mut params = vec![("maxResults", max_results.max(1).to_string())];
        if !query.is_empty() {
            params.push(("q", query.to_string()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let url = format!("{}/messages", self.api_url);
        let list: MessageList = self.get_json(credentials, &url, &params).await?;

        Ok(MessagePage {
            ids: list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|entry| entry.id)
                .collect(),
            next_page_token: list.next_page_token.filter(|token| !token.is_empty()),
        })
    }

    async fn get_message(
        &self,
        credentials: &MailboxCredentials,
        id: &str,
    ) -> Result<NewMessage, TransportError> {
        let url = format!("{}/messages/{}", self.api_url, id);
        let message: RawMessage = self
            .get_json(credentials, &url, &[("format", "raw".to_string())])
            .await?;

        let raw = message.raw.as_deref().ok_or_else(|| TransportError::Parse {
            id: id.to_string(),
            reason: "response has no raw payload".to_string(),
        })?;

        let bytes = RAW_ENGINE
            .decode(raw.trim())
            .map_err(|err| TransportError::Parse {
                id: id.to_string(),
                reason: format!("invalid base64url payload: {err}"),
            })?;

        let envelope = ProviderEnvelope {
            id: message.id,
            thread_id: message.thread_id,
            label_ids: message.label_ids,
            snippet: message.snippet,
        };

        parse_raw_message(envelope, &bytes).map_err(|err| TransportError::Parse {
            id: id.to_string(),
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_payload_decodes_with_or_without_padding() {
        let padded = base64::engine::general_purpose::URL_SAFE.encode(b"Subject: hi\r\n\r\nbody?");
        let unpadded = padded.trim_end_matches('=');
        assert_eq!(RAW_ENGINE.decode(&padded).unwrap(), b"Subject: hi\r\n\r\nbody?");
        assert_eq!(RAW_ENGINE.decode(unpadded).unwrap(), b"Subject: hi\r\n\r\nbody?");
    }

    #[test]
    fn empty_list_response_has_no_ids() {
        let list: MessageList = serde_json::from_str(r#"{"resultSizeEstimate":0}"#).unwrap();
        assert!(list.messages.is_none());
        assert!(list.next_page_token.is_none());
    }
}
