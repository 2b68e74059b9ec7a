//! HTTP route handlers grouped by resource.
//!
//! Handlers are annotated with `#[openapi]` so `rocket_okapi` derives the
//! OpenAPI document served next to Swagger UI and RapiDoc.

pub mod chat;
pub mod emails;
pub mod guards;
pub mod health;

use crate::error::ApiError;
use rocket::Route;
use rocket_okapi::openapi_get_routes;

/// Every API route, ready to mount under `/api`.
pub fn api_routes() -> Vec<Route> {
    openapi_get_routes![
        health::health_check,
        emails::sync_emails,
        emails::cancel_sync,
        emails::sync_stats,
        emails::embedding_stats,
        emails::search_embeddings,
        emails::clear_embeddings,
        emails::clear_store,
        emails::purge_user,
        chat::ask,
    ]
}

/// Trimmed, non-empty user id or a 400.
pub(crate) fn require_user_id(user_id: &str) -> Result<String, ApiError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }
    Ok(user_id.to_string())
}
