use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by coordinator operations.
///
/// Transport failures are passed through verbatim; the client never retries.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("coordinator request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("coordinator returned {status} for {path}: {body}")]
    Status {
        status: StatusCode,
        path: String,
        body: String,
    },

    #[error("failed to decode coordinator response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid base64 in coordinator response: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid coordinator address: {0}")]
    Address(#[from] url::ParseError),
}
