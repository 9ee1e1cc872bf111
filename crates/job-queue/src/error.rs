//! Queue error types

use thiserror::Error;

/// Errors surfaced by the job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Underlying database failure.
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Payload could not be (de)serialized.
    #[error("job payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// The referenced job does not exist.
    #[error("unknown job: {0}")]
    UnknownJob(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;
