use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to the mail provider. A failed page aborts the sync run;
/// a failed single message is skipped.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("mailbox HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mailbox returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("mailbox rejected the access token")]
    Unauthorized,
    #[error("failed to decode mailbox response: {0}")]
    Decode(String),
    #[error("failed to parse message {id}: {reason}")]
    Parse { id: String, reason: String },
}

impl TransportError {
    pub fn from_status(status: StatusCode, body: String) -> Self {
        if status == StatusCode::UNAUTHORIZED {
            TransportError::Unauthorized
        } else {
            TransportError::Status { status, body }
        }
    }
}
