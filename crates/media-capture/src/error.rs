//! Media pipeline error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("malformed stream frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("invalid media payload: {0}")]
    Payload(#[from] base64::DecodeError),

    #[error("leg store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("recording upload failed: {0}")]
    Upload(#[source] anyhow::Error),

    #[error("no capture session for call {0}")]
    UnknownCall(String),
}

pub type Result<T> = std::result::Result<T, MediaError>;
