//! Retrieval-augmented question answering.

use super::require_user_id;
use crate::chat::{ChatAnswer, ChatQuery};
use crate::error::ApiError;
use crate::state::AppState;
use rocket::serde::json::Json;
use rocket::{State, post};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::Deserialize;

fn default_content_type() -> String {
    "all".to_string()
}

/// Request body for `POST /chat/ask`.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AskRequest {
    pub user_id: String,
    pub question: String,
    /// `all` (default) or a content type such as `emails`.
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Matches retrieved as context; clamped by the index maximum.
    pub max_context_items: Option<usize>,
    /// Approximate per-item token budget, applied when `truncate_context` is set.
    pub max_tokens_per_item: Option<usize>,
    #[serde(default)]
    pub truncate_context: bool,
}

/// Answer a question from the user's indexed mail.
///
/// Retrieval and generation failures are reported with `success = false`
/// and an explanatory `answer`, never as an HTTP error.
#[openapi(tag = "Chat")]
#[post("/chat/ask", data = "<request>")]
pub async fn ask(
    request: Json<AskRequest>,
    state: &State<AppState>,
) -> Result<Json<ChatAnswer>, ApiError> {
    let request = request.into_inner();
    let user_id = require_user_id(&request.user_id)?;
    if request.question.trim().is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }

    let query = ChatQuery {
        user_id,
        question: request.question,
        content_type: request.content_type,
        max_context_items: request.max_context_items,
        max_tokens_per_item: request.max_tokens_per_item,
        truncate_context: request.truncate_context,
    };

    Ok(Json(state.chat.answer(&query).await))
}
