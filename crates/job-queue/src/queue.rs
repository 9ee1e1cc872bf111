//! SQLite-backed queue operations

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::job::{ClaimedJob, EnqueueResult, JobOptions, JobRecord, JobState};

/// Tunables for claiming, retry, and retention behaviour.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Idle sleep between claim attempts when the queue is drained.
    pub poll_interval: Duration,
    /// Lease granted to a claimed job; an expired lease makes the job
    /// claimable again (stalled-job detection).
    pub lease: Duration,
    /// First retry delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Upper bound on the retry delay.
    pub backoff_cap: Duration,
    /// How long terminal jobs stay visible before the reaper deletes them.
    pub retention: Duration,
    /// Default attempt cap when the enqueue does not override it.
    pub default_max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            lease: Duration::from_secs(120),
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(300),
            retention: Duration::from_secs(24 * 3600),
            default_max_attempts: 3,
        }
    }
}

/// Aggregate queue counts for the operator dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub scheduled: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Durable delayed queue over a shared SQLite pool.
#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    config: QueueConfig,
}

impl JobQueue {
    /// Open (or create) the queue database and ensure the schema exists.
    pub async fn connect(database_url: &str, config: QueueConfig) -> Result<Self> {
        // An in-memory database exists per connection; more than one
        // connection would shard the queue into disjoint empty tables.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let queue = Self { pool, config };
        queue.init_schema().await?;
        info!("job queue ready at {}", database_url);
        Ok(queue)
    }

    /// In-memory queue for tests. A single connection keeps every query on
    /// the same ephemeral database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let queue = Self {
            pool,
            config: QueueConfig {
                poll_interval: Duration::from_millis(10),
                backoff_base: Duration::from_millis(20),
                ..QueueConfig::default()
            },
        };
        queue.init_schema().await?;
        Ok(queue)
    }

    /// Build over an existing pool (shared with other covercall tables).
    pub async fn with_pool(pool: SqlitePool, config: QueueConfig) -> Result<Self> {
        let queue = Self { pool, config };
        queue.init_schema().await?;
        Ok(queue)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                job_id       TEXT PRIMARY KEY,
                queue        TEXT NOT NULL,
                subject      TEXT,
                payload      TEXT NOT NULL,
                priority     INTEGER NOT NULL DEFAULT 2,
                state        TEXT NOT NULL DEFAULT 'scheduled',
                run_at       TEXT NOT NULL,
                attempts     INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                lease_until  TEXT,
                last_error   TEXT,
                created_at   TEXT NOT NULL,
                finished_at  TEXT
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_claim
             ON jobs (queue, state, run_at, priority)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_subject ON jobs (subject)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Enqueue `payload` on `queue` to run at `run_at`.
    ///
    /// When `opts.job_id` is supplied and a row with that id already exists,
    /// nothing is written and `EnqueueResult::Duplicate` is returned.
    pub async fn enqueue<P: Serialize>(
        &self,
        queue: &str,
        payload: &P,
        run_at: DateTime<Utc>,
        opts: JobOptions,
    ) -> Result<EnqueueResult> {
        let job_id = opts
            .job_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let body = serde_json::to_string(payload)?;
        let max_attempts = opts
            .max_attempts
            .unwrap_or(self.config.default_max_attempts) as i64;

        let result = sqlx::query(
            "INSERT INTO jobs
                (job_id, queue, subject, payload, priority, state, run_at,
                 attempts, max_attempts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'scheduled', ?6, 0, ?7, ?8)
             ON CONFLICT(job_id) DO NOTHING",
        )
        .bind(&job_id)
        .bind(queue)
        .bind(&opts.subject)
        .bind(&body)
        .bind(opts.priority.as_i64())
        .bind(run_at)
        .bind(max_attempts)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(job_id = %job_id, queue = %queue, "enqueue de-duplicated");
            Ok(EnqueueResult::Duplicate(job_id))
        } else {
            debug!(job_id = %job_id, queue = %queue, run_at = %run_at, "job enqueued");
            Ok(EnqueueResult::Created(job_id))
        }
    }

    /// Best-effort cancellation of a job that has not started running.
    /// Returns whether the job was actually removed from the schedule.
    pub async fn cancel(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'cancelled', finished_at = ?2
             WHERE job_id = ?1 AND state = 'scheduled'",
        )
        .bind(job_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Cancel every still-scheduled job carrying `subject`. Running jobs are
    /// left to the dispatch-time epoch check. Returns the cancelled count.
    pub async fn cancel_subject(&self, subject: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'cancelled', finished_at = ?2
             WHERE subject = ?1 AND state = 'scheduled'",
        )
        .bind(subject)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        let n = result.rows_affected();
        if n > 0 {
            debug!(subject = %subject, cancelled = n, "cancelled scheduled jobs");
        }
        Ok(n)
    }

    /// Claim the next ready job on `queue`, honouring priority and lease
    /// expiry. Returns `None` when nothing is ready.
    pub async fn claim(&self, queue: &str) -> Result<Option<ClaimedJob>> {
        let now = Utc::now();
        let lease_until = now
            + chrono::Duration::from_std(self.config.lease)
                .unwrap_or_else(|_| chrono::Duration::seconds(120));

        let record = sqlx::query_as::<_, JobRecord>(
            "UPDATE jobs
             SET state = 'running', attempts = attempts + 1, lease_until = ?3
             WHERE job_id = (
                 SELECT job_id FROM jobs
                 WHERE queue = ?1
                   AND ((state = 'scheduled' AND run_at <= ?2)
                        OR (state = 'running' AND lease_until IS NOT NULL
                            AND lease_until <= ?2))
                 ORDER BY priority ASC, run_at ASC
                 LIMIT 1
             )
             RETURNING job_id, queue, subject, payload, priority, state,
                       run_at, attempts, max_attempts, lease_until,
                       last_error, created_at, finished_at",
        )
        .bind(queue)
        .bind(now)
        .bind(lease_until)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|record| ClaimedJob { record }))
    }

    /// Mark a claimed job as done.
    pub async fn complete(&self, job_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs
             SET state = 'succeeded', lease_until = NULL, finished_at = ?2
             WHERE job_id = ?1 AND state = 'running'",
        )
        .bind(job_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a handler failure: reschedule with backoff while attempts
    /// remain, otherwise park the job in the failed bucket.
    pub async fn fail(&self, job_id: &str, error: &str) -> Result<JobState> {
        let record = self
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;

        if record.attempts >= record.max_attempts {
            sqlx::query(
                "UPDATE jobs
                 SET state = 'failed', lease_until = NULL,
                     last_error = ?2, finished_at = ?3
                 WHERE job_id = ?1",
            )
            .bind(job_id)
            .bind(error)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
            warn!(job_id = %job_id, attempts = record.attempts, error = %error,
                  "job moved to failed bucket");
            Ok(JobState::Failed)
        } else {
            let delay = self.backoff_delay(record.attempts.max(1) as u32);
            let run_at = Utc::now()
                + chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(5));
            sqlx::query(
                "UPDATE jobs
                 SET state = 'scheduled', lease_until = NULL,
                     last_error = ?2, run_at = ?3
                 WHERE job_id = ?1",
            )
            .bind(job_id)
            .bind(error)
            .bind(run_at)
            .execute(&self.pool)
            .await?;
            debug!(job_id = %job_id, attempt = record.attempts, retry_at = %run_at,
                   "job rescheduled after failure");
            Ok(JobState::Scheduled)
        }
    }

    /// Exponential backoff with +/-20% jitter, capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.config.backoff_base.as_millis() as u64;
        let raw = base.saturating_mul(1u64 << exp);
        let capped = raw.min(self.config.backoff_cap.as_millis() as u64);
        let jitter = rand::thread_rng().gen_range(0.8f64..1.2f64);
        Duration::from_millis(((capped as f64) * jitter) as u64)
    }

    /// Fetch a job row by id.
    pub async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let record = sqlx::query_as::<_, JobRecord>(
            "SELECT job_id, queue, subject, payload, priority, state, run_at,
                    attempts, max_attempts, lease_until, last_error,
                    created_at, finished_at
             FROM jobs WHERE job_id = ?1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Counts per state across all queues.
    pub async fn stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;
        let mut stats = QueueStats::default();
        for row in rows {
            let state: String = row.get("state");
            let n: i64 = row.get("n");
            let n = n.max(0) as u64;
            match JobState::parse(&state) {
                Some(JobState::Scheduled) => stats.scheduled = n,
                Some(JobState::Running) => stats.running = n,
                Some(JobState::Succeeded) => stats.succeeded = n,
                Some(JobState::Failed) => stats.failed = n,
                Some(JobState::Cancelled) => stats.cancelled = n,
                None => {}
            }
        }
        Ok(stats)
    }

    /// Delete terminal jobs older than the retention window. Returns the
    /// number of rows removed.
    pub async fn reap(&self) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        let result = sqlx::query(
            "DELETE FROM jobs
             WHERE state IN ('succeeded', 'failed', 'cancelled')
               AND finished_at IS NOT NULL AND finished_at <= ?1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
