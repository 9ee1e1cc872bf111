//! IVR error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IvrError {
    #[error("no call session for {0}")]
    UnknownSession(String),

    #[error("records API error: {0}")]
    Records(#[source] anyhow::Error),

    #[error("carrier error: {0}")]
    Carrier(#[source] anyhow::Error),

    #[error("escalation error: {0}")]
    Escalation(#[from] covercall_escalation::EscalationError),

    #[error("transfer store error: {0}")]
    Store(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, IvrError>;
