//! Escalation engine error types

use thiserror::Error;

use crate::types::{OccurrenceId, ProviderId};

/// Errors raised by the escalation engine.
///
/// Race outcomes (`AlreadyAssigned`, `Closed`) are *not* errors, they are
/// ordinary values of [`crate::types::AcceptOutcome`], so everything here
/// is either an external failure worth retrying or a caller mistake.
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("unknown occurrence: {0}")]
    UnknownOccurrence(OccurrenceId),

    #[error("provider {provider} is misconfigured: {reason}")]
    ProviderMisconfigured {
        provider: ProviderId,
        reason: String,
    },

    /// The conditional update kept losing; the caller should retry later.
    #[error("records store contention on occurrence {0}")]
    StoreContention(OccurrenceId),

    #[error("records API error: {0}")]
    Records(#[source] anyhow::Error),

    #[error("carrier error: {0}")]
    Carrier(#[source] anyhow::Error),

    #[error("speech synthesis error: {0}")]
    Tts(#[source] anyhow::Error),

    #[error("queue error: {0}")]
    Queue(#[from] covercall_queue::QueueError),

    #[error("engine store error: {0}")]
    Store(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, EscalationError>;
