//! Worker loop: claim, dispatch, complete/fail

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info};

use crate::job::ClaimedJob;
use crate::queue::JobQueue;

/// A queue consumer. Handlers must be idempotent: delivery is
/// at-least-once, and a lease expiry replays the job from the beginning.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: ClaimedJob) -> anyhow::Result<()>;
}

impl JobQueue {
    /// Run a worker loop over `queue` until `shutdown` flips to true.
    ///
    /// Up to `concurrency` jobs are dispatched at once; each outcome is
    /// written back through [`JobQueue::complete`] / [`JobQueue::fail`].
    pub async fn run_worker(
        self: Arc<Self>,
        queue: &str,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        info!(queue = %queue, concurrency, "queue worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => continue,
            };

            match self.claim(queue).await {
                Ok(Some(job)) => {
                    let queue_ref = self.clone();
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let job_id = job.job_id().to_string();
                        debug!(job_id = %job_id, "dispatching job");
                        match handler.handle(job).await {
                            Ok(()) => {
                                if let Err(e) = queue_ref.complete(&job_id).await {
                                    error!(job_id = %job_id, error = %e,
                                           "failed to mark job complete");
                                }
                            }
                            Err(e) => {
                                if let Err(db) =
                                    queue_ref.fail(&job_id, &format!("{e:#}")).await
                                {
                                    error!(job_id = %job_id, error = %db,
                                           "failed to record job failure");
                                }
                            }
                        }
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config().poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(queue = %queue, error = %e, "claim failed");
                    tokio::time::sleep(self.config().poll_interval).await;
                }
            }
        }

        info!(queue = %queue, "queue worker stopped");
    }

    /// Periodically delete terminal jobs past the retention window.
    pub async fn run_reaper(
        self: Arc<Self>,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            match self.reap().await {
                Ok(0) => {}
                Ok(n) => debug!(reaped = n, "reaped terminal jobs"),
                Err(e) => error!(error = %e, "job reap failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Serialize, Deserialize)]
    struct Tick;

    struct Counter {
        seen: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for Counter {
        async fn handle(&self, _job: ClaimedJob) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn worker_drains_ready_jobs() {
        let queue = Arc::new(JobQueue::in_memory().await.unwrap());
        for _ in 0..5 {
            queue
                .enqueue("sms-waves", &Tick, Utc::now(), JobOptions::default())
                .await
                .unwrap();
        }

        let handler = Arc::new(Counter {
            seen: AtomicU32::new(0),
        });
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = tokio::spawn(queue.clone().run_worker(
            "sms-waves",
            2,
            handler.clone(),
            stop_rx,
        ));

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        stop_tx.send(true).unwrap();
        let _ = worker.await;

        assert_eq!(handler.seen.load(Ordering::SeqCst), 5);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.succeeded, 5);
    }
}
