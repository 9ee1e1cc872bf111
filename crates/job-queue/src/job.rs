//! Job rows and enqueue/claim result types

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::Result;

/// Lifecycle of a persisted job.
///
/// `Scheduled → Running → Succeeded | Scheduled (retry) | Failed`, with
/// `Cancelled` reachable only from `Scheduled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Scheduled => "scheduled",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<JobState> {
        match s {
            "scheduled" => Some(JobState::Scheduled),
            "running" => Some(JobState::Running),
            "succeeded" => Some(JobState::Succeeded),
            "failed" => Some(JobState::Failed),
            "cancelled" => Some(JobState::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Ordering of ready jobs within a queue (lower value runs first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    pub fn as_i64(&self) -> i64 {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }
}

/// Options accepted by [`crate::JobQueue::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Deterministic id for de-duplication; a random id is minted when
    /// absent.
    pub job_id: Option<String>,
    /// Correlation key (covercall uses the occurrence id) enabling
    /// best-effort bulk cancellation.
    pub subject: Option<String>,
    pub priority: JobPriority,
    /// Attempt cap before the job moves to the failed bucket.
    pub max_attempts: Option<u32>,
}

/// Result of an enqueue, distinguishing idempotency hits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// A new row was created.
    Created(String),
    /// A row with this `job_id` already existed; nothing was written.
    Duplicate(String),
}

impl EnqueueResult {
    pub fn job_id(&self) -> &str {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// Raw persisted job row.
#[derive(Debug, Clone, FromRow)]
pub struct JobRecord {
    pub job_id: String,
    pub queue: String,
    pub subject: Option<String>,
    pub payload: String,
    pub priority: i64,
    pub state: String,
    pub run_at: DateTime<Utc>,
    pub attempts: i64,
    pub max_attempts: i64,
    pub lease_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A job handed to a worker, with its payload still serialized.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub record: JobRecord,
}

impl ClaimedJob {
    pub fn job_id(&self) -> &str {
        &self.record.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.record.attempts.max(0) as u32
    }

    /// Deserialize the payload into the worker's job type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.record.payload)?)
    }
}
