use crate::search::IndexError;
use crate::store::StorageError;
use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{Request, Response};
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::response::OpenApiResponderInner;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Storage(StorageError),
    Index(IndexError),
    Internal(String),
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                (Status::BadRequest, "BadRequest", msg)
            }
            ApiError::Storage(e) => {
                log::error!("storage error: {}", e);
                (Status::ServiceUnavailable, "StorageError", e.to_string())
            }
            ApiError::Index(e) => {
                log::error!("index error: {}", e);
                (Status::ServiceUnavailable, "IndexError", e.to_string())
            }
            ApiError::Internal(msg) => {
                log::error!("internal error: {}", msg);
                (Status::InternalServerError, "InternalError", msg)
            }
        };

        let json = serde_json::to_string(&ErrorResponse::new(error_type, message))
            .unwrap_or_else(|_| r#"{"error":"SerializationError","message":"Failed to serialize error"}"#.to_string());

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(_generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "Malformed or out-of-range parameters"),
            ("401", "Missing or rejected mailbox token"),
            ("500", "Unexpected server failure"),
            ("503", "Message store or vector index unavailable"),
        ] {
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err)
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        ApiError::Index(err)
    }
}

#[catch(400)]
pub fn bad_request(req: &Request<'_>) -> Json<ErrorResponse> {
    Json(ErrorResponse::new(
        "BadRequest",
        format!("malformed request to {}", req.uri()),
    ))
}

#[catch(401)]
pub fn unauthorized(_req: &Request<'_>) -> Json<ErrorResponse> {
    Json(ErrorResponse::new(
        "Unauthorized",
        "missing or invalid `Authorization: Bearer` mailbox token",
    ))
}

#[catch(404)]
pub fn not_found(req: &Request<'_>) -> Json<ErrorResponse> {
    Json(ErrorResponse::new(
        "NotFound",
        format!("no route for {}", req.uri()),
    ))
}

#[catch(422)]
pub fn unprocessable(_req: &Request<'_>) -> Json<ErrorResponse> {
    Json(ErrorResponse::new(
        "BadRequest",
        "request body does not match the expected schema",
    ))
}

#[catch(500)]
pub fn internal_error(_req: &Request<'_>) -> Json<ErrorResponse> {
    Json(ErrorResponse::new("InternalError", "internal server error"))
}

pub fn catchers() -> Vec<rocket::Catcher> {
    catchers![bad_request, unauthorized, not_found, unprocessable, internal_error]
}
