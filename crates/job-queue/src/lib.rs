//! # Durable Job Queue (sqlx + SQLite)
//!
//! Delayed-queue abstraction shared by the covercall workers. Jobs are
//! persisted rows, so scheduling survives process restarts, and delivery is
//! at-least-once: a claimed job holds a lease, and a worker that dies simply
//! lets the lease expire so another claimer reruns the job. Handlers are
//! therefore written to be idempotent (deterministic `job_id`s plus the
//! escalation-epoch check at dispatch).
//!
//! ## Contracts
//!
//! - `enqueue` with an explicit `job_id` is a no-op when that id already
//!   exists (`EnqueueResult::Duplicate`), giving at-most-one pending
//!   instance of a logically identical job.
//! - `cancel` removes a job that has not started running yet; removal of a
//!   running job is refused and the caller falls back to the dispatch-time
//!   epoch check.
//! - Failed handlers are retried with exponential backoff up to
//!   `max_attempts`, then parked in the failed bucket for an operator.
//! - Succeeded jobs linger for a retention window before being reaped.

mod error;
mod job;
mod queue;
mod worker;

pub use error::{QueueError, Result};
pub use job::{ClaimedJob, EnqueueResult, JobOptions, JobPriority, JobRecord, JobState};
pub use queue::{JobQueue, QueueConfig, QueueStats};
pub use worker::JobHandler;
