//! # Shift Escalation Controller
//!
//! The single authority for progressing an occurrence through its cascade
//! and for arbitrating concurrent acceptances. The controller never sleeps:
//! all time is expressed as durable jobs, and per-occurrence correctness is
//! enforced by the records store's conditional update plus the escalation
//! epoch stamped on every queued job, not by in-memory locks.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use covercall_queue::{JobOptions, JobPriority, JobQueue};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EscalationError, Result};
use crate::events::{EventKind, EventPublisher, EventRecord};
use crate::jobs::{
    cascade_job_id, confirmation_job_id, wave_job_id, ConfirmationSmsJob, OutboundJob,
    SendWaveJob, QUEUE_CONFIRMATION, QUEUE_OUTBOUND, QUEUE_SMS_WAVES,
};
use crate::live::{LiveCallRegistry, TerminationNotice};
use crate::records::{
    OccurrencePatch, ProviderConfig, RecordsApi, ShiftOccurrence, UpdateOutcome,
};
use crate::types::{AcceptOutcome, AcceptSource, OccurrenceId, OccurrenceStatus, StaffId};

/// Central escalation coordinator shared by the workers and webhooks.
pub struct EscalationController {
    records: Arc<dyn RecordsApi>,
    queue: Arc<JobQueue>,
    events: Arc<EventPublisher>,
    live: Arc<LiveCallRegistry>,
    config: EngineConfig,
}

impl EscalationController {
    pub fn new(
        records: Arc<dyn RecordsApi>,
        queue: Arc<JobQueue>,
        events: Arc<EventPublisher>,
        live: Arc<LiveCallRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            records,
            queue,
            events,
            live,
            config,
        }
    }

    pub fn records(&self) -> &Arc<dyn RecordsApi> {
        &self.records
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn events(&self) -> &Arc<EventPublisher> {
        &self.events
    }

    pub fn live(&self) -> &Arc<LiveCallRegistry> {
        &self.live
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// (Re)start the escalation cascade for an occurrence.
    ///
    /// Bumps the escalation epoch (invalidating all previously queued work),
    /// persists `OPEN`, enqueues wave 1 immediately and waves 2/3 at the
    /// derived interval when they still land before the shift starts.
    /// Returns the new epoch.
    ///
    /// A misconfigured provider rejects the occurrence outright: a surfaced
    /// `escalation_rejected` event and no partial state.
    pub async fn start_escalation(&self, occurrence_id: &OccurrenceId) -> Result<i64> {
        let occurrence = self.load(occurrence_id).await?;
        let provider = self
            .records
            .provider_config(&occurrence.provider_id)
            .await
            .map_err(EscalationError::Records)?;

        let provider = match provider {
            Some(p) => p,
            None => {
                return self
                    .reject_escalation(&occurrence, "provider has no configuration")
                    .await
            }
        };
        if let Some(reason) = provider.validation_error() {
            return self.reject_escalation(&occurrence, &reason).await;
        }

        let updated = self
            .conditional_update(occurrence_id, |occ| OccurrencePatch {
                status: Some(OccurrenceStatus::Open),
                assignee: Some(None),
                escalation_epoch: Some(occ.escalation_epoch + 1),
            })
            .await?;
        let epoch = updated.escalation_epoch;

        let now = Utc::now();
        let interval = wave_interval(&provider, updated.scheduled_at, now);
        let wave_times = planned_waves(updated.scheduled_at, now, interval);
        let last_wave = wave_times.len() as u8;

        for (i, run_at) in wave_times.iter().enumerate() {
            let wave = (i + 1) as u8;
            let job = SendWaveJob {
                occurrence_id: occurrence_id.clone(),
                provider_id: updated.provider_id.clone(),
                wave,
                epoch,
                last_wave: wave == last_wave,
            };
            self.queue
                .enqueue(
                    QUEUE_SMS_WAVES,
                    &job,
                    *run_at,
                    JobOptions {
                        job_id: Some(wave_job_id(occurrence_id, epoch, wave)),
                        subject: Some(occurrence_id.to_string()),
                        priority: JobPriority::High,
                        max_attempts: None,
                    },
                )
                .await?;
        }

        info!(occurrence = %occurrence_id, epoch, waves = wave_times.len(),
              interval_minutes = interval.num_minutes(), "escalation started");
        self.events
            .publish(
                EventRecord::new(updated.provider_id.clone(), EventKind::ShiftOpened)
                    .occurrence(occurrence_id.clone())
                    .detail(serde_json::json!({
                        "epoch": epoch,
                        "waves_planned": wave_times.len(),
                    })),
            )
            .await;
        Ok(epoch)
    }

    /// Called by the wave worker once wave `job.wave` has committed.
    ///
    /// After the final planned wave, and with outbound calling enabled for
    /// the provider, the call cascade is scheduled: `wait_minutes` after a
    /// real wave 3, immediately when wave 3 was skipped for lack of time.
    pub async fn on_wave_complete(&self, job: &SendWaveJob) -> Result<()> {
        let occurrence = self.load(&job.occurrence_id).await?;
        if occurrence.escalation_epoch != job.epoch {
            return Ok(());
        }
        if !job.last_wave || occurrence.status.is_terminal() {
            return Ok(());
        }
        let Some(provider) = self
            .records
            .provider_config(&occurrence.provider_id)
            .await
            .map_err(EscalationError::Records)?
        else {
            return Ok(());
        };
        if !provider.outbound_enabled {
            return Ok(());
        }

        let delay_minutes = if job.wave == 3 {
            provider.wait_minutes as i64
        } else {
            0
        };
        let run_at = Utc::now() + Duration::minutes(delay_minutes);
        self.queue
            .enqueue(
                QUEUE_OUTBOUND,
                &OutboundJob::CascadeStart {
                    occurrence_id: job.occurrence_id.clone(),
                    epoch: job.epoch,
                },
                run_at,
                JobOptions {
                    job_id: Some(cascade_job_id(&job.occurrence_id, job.epoch)),
                    subject: Some(job.occurrence_id.to_string()),
                    priority: JobPriority::High,
                    max_attempts: None,
                },
            )
            .await?;

        info!(occurrence = %job.occurrence_id, delay_minutes, "outbound cascade scheduled");
        self.events
            .publish(
                EventRecord::new(occurrence.provider_id.clone(), EventKind::OutboundCallScheduled)
                    .occurrence(job.occurrence_id.clone())
                    .detail(serde_json::json!({ "delay_minutes": delay_minutes })),
            )
            .await;
        Ok(())
    }

    /// The single atomic assignment.
    ///
    /// Compare-and-set from an acceptable status to `ASSIGNED`; exactly one
    /// concurrent caller wins. On success the epoch is bumped in the same
    /// write (implicitly invalidating queued waves and offers), known jobs
    /// are cancelled best-effort, the confirmation SMS is enqueued, events
    /// are emitted, and live call legs are signalled to wind down.
    pub async fn try_accept(
        &self,
        occurrence_id: &OccurrenceId,
        staff_id: &StaffId,
        source: AcceptSource,
    ) -> Result<AcceptOutcome> {
        for _ in 0..self.config.accept_retry_limit.max(1) {
            let occurrence = self.load(occurrence_id).await?;

            if occurrence.status == OccurrenceStatus::Assigned {
                let holder = occurrence
                    .assignee
                    .clone()
                    .unwrap_or_else(|| staff_id.clone());
                return Ok(AcceptOutcome::AlreadyAssigned(holder));
            }
            if !occurrence.status.is_acceptable() {
                return Ok(AcceptOutcome::Closed);
            }
            if !occurrence.pool.contains(staff_id) {
                return Ok(AcceptOutcome::Ineligible);
            }

            let outcome = self
                .records
                .update_occurrence(
                    occurrence_id,
                    occurrence.version,
                    OccurrencePatch {
                        status: Some(OccurrenceStatus::Assigned),
                        assignee: Some(Some(staff_id.clone())),
                        escalation_epoch: Some(occurrence.escalation_epoch + 1),
                    },
                )
                .await
                .map_err(EscalationError::Records)?;

            match outcome {
                UpdateOutcome::Applied(updated) => {
                    info!(occurrence = %occurrence_id, staff = %staff_id, source = %source,
                          "shift assigned");
                    self.after_accept(&updated, staff_id, source).await;
                    return Ok(AcceptOutcome::Accepted);
                }
                UpdateOutcome::Conflict => continue,
            }
        }
        Err(EscalationError::StoreContention(occurrence_id.clone()))
    }

    /// Stop the cascade without assigning: same epoch-bumping transition,
    /// to `CANCELLED`.
    pub async fn cancel_escalation(
        &self,
        occurrence_id: &OccurrenceId,
        reason: &str,
    ) -> Result<()> {
        for _ in 0..self.config.accept_retry_limit.max(1) {
            let occurrence = self.load(occurrence_id).await?;
            if occurrence.status.is_terminal() {
                return Ok(());
            }
            let outcome = self
                .records
                .update_occurrence(
                    occurrence_id,
                    occurrence.version,
                    OccurrencePatch {
                        status: Some(OccurrenceStatus::Cancelled),
                        assignee: None,
                        escalation_epoch: Some(occurrence.escalation_epoch + 1),
                    },
                )
                .await
                .map_err(EscalationError::Records)?;
            match outcome {
                UpdateOutcome::Applied(updated) => {
                    if let Err(e) = self.queue.cancel_subject(occurrence_id.as_str()).await {
                        warn!(occurrence = %occurrence_id, error = %e,
                              "job cancellation sweep failed");
                    }
                    info!(occurrence = %occurrence_id, reason, "escalation cancelled");
                    self.events
                        .publish(
                            EventRecord::new(
                                updated.provider_id.clone(),
                                EventKind::EscalationCancelled,
                            )
                            .occurrence(occurrence_id.clone())
                            .detail(serde_json::json!({ "reason": reason })),
                        )
                        .await;
                    self.live.notify(occurrence_id, TerminationNotice::Cancelled);
                    return Ok(());
                }
                UpdateOutcome::Conflict => continue,
            }
        }
        Err(EscalationError::StoreContention(occurrence_id.clone()))
    }

    async fn after_accept(
        &self,
        occurrence: &ShiftOccurrence,
        staff_id: &StaffId,
        source: AcceptSource,
    ) {
        // Best-effort sweep of everything still scheduled; anything already
        // running is dropped by its own epoch check.
        if let Err(e) = self
            .queue
            .cancel_subject(occurrence.occurrence_id.as_str())
            .await
        {
            warn!(occurrence = %occurrence.occurrence_id, error = %e,
                  "job cancellation sweep failed");
        }

        let confirmation = ConfirmationSmsJob {
            occurrence_id: occurrence.occurrence_id.clone(),
            staff_id: staff_id.clone(),
            epoch: occurrence.escalation_epoch,
        };
        if let Err(e) = self
            .queue
            .enqueue(
                QUEUE_CONFIRMATION,
                &confirmation,
                Utc::now(),
                JobOptions {
                    job_id: Some(confirmation_job_id(
                        &occurrence.occurrence_id,
                        occurrence.escalation_epoch,
                    )),
                    subject: None,
                    priority: JobPriority::Critical,
                    max_attempts: None,
                },
            )
            .await
        {
            warn!(occurrence = %occurrence.occurrence_id, error = %e,
                  "failed to enqueue confirmation sms");
        }

        self.events
            .publish(
                EventRecord::new(occurrence.provider_id.clone(), EventKind::ShiftFilled)
                    .occurrence(occurrence.occurrence_id.clone())
                    .detail(serde_json::json!({
                        "staff_id": staff_id.as_str(),
                        "source": source.to_string(),
                    })),
            )
            .await;

        self.live.notify(
            &occurrence.occurrence_id,
            TerminationNotice::TakenBy(staff_id.clone()),
        );
    }

    /// Commit `WAVE_n_SENT` for a wave that just went out. Returns `false`
    /// (without writing) when the epoch went stale or the occurrence turned
    /// terminal while the wave was sending.
    pub async fn mark_wave_sent(
        &self,
        occurrence_id: &OccurrenceId,
        epoch: i64,
        wave: u8,
    ) -> Result<bool> {
        self.guarded_transition(occurrence_id, epoch, OccurrenceStatus::wave_sent(wave))
            .await
    }

    /// Commit `CALLING` at the start of the outbound cascade.
    pub async fn mark_calling(&self, occurrence_id: &OccurrenceId, epoch: i64) -> Result<bool> {
        self.guarded_transition(occurrence_id, epoch, OccurrenceStatus::Calling)
            .await
    }

    /// Commit `UNFILLED_AFTER_CALLS` once every round is exhausted.
    pub async fn mark_unfilled(&self, occurrence_id: &OccurrenceId, epoch: i64) -> Result<bool> {
        self.guarded_transition(occurrence_id, epoch, OccurrenceStatus::UnfilledAfterCalls)
            .await
    }

    /// Epoch-guarded status write shared by the workers.
    async fn guarded_transition(
        &self,
        occurrence_id: &OccurrenceId,
        epoch: i64,
        status: OccurrenceStatus,
    ) -> Result<bool> {
        for _ in 0..self.config.accept_retry_limit.max(1) {
            let occurrence = self.load(occurrence_id).await?;
            if occurrence.escalation_epoch != epoch || occurrence.status.is_terminal() {
                return Ok(false);
            }
            match self
                .records
                .update_occurrence(
                    occurrence_id,
                    occurrence.version,
                    OccurrencePatch {
                        status: Some(status),
                        assignee: None,
                        escalation_epoch: None,
                    },
                )
                .await
                .map_err(EscalationError::Records)?
            {
                UpdateOutcome::Applied(_) => return Ok(true),
                UpdateOutcome::Conflict => continue,
            }
        }
        Err(EscalationError::StoreContention(occurrence_id.clone()))
    }

    /// Config-absence path: surface an `escalation_rejected` event and fail
    /// without writing any occurrence state.
    async fn reject_escalation(
        &self,
        occurrence: &ShiftOccurrence,
        reason: &str,
    ) -> Result<i64> {
        self.events
            .publish(
                EventRecord::new(occurrence.provider_id.clone(), EventKind::EscalationRejected)
                    .occurrence(occurrence.occurrence_id.clone())
                    .detail(serde_json::json!({ "reason": reason })),
            )
            .await;
        Err(EscalationError::ProviderMisconfigured {
            provider: occurrence.provider_id.clone(),
            reason: reason.to_string(),
        })
    }

    async fn load(&self, occurrence_id: &OccurrenceId) -> Result<ShiftOccurrence> {
        self.records
            .occurrence(occurrence_id)
            .await
            .map_err(EscalationError::Records)?
            .ok_or_else(|| EscalationError::UnknownOccurrence(occurrence_id.clone()))
    }

    async fn conditional_update<F>(
        &self,
        occurrence_id: &OccurrenceId,
        patch_for: F,
    ) -> Result<ShiftOccurrence>
    where
        F: Fn(&ShiftOccurrence) -> OccurrencePatch,
    {
        for _ in 0..self.config.accept_retry_limit.max(1) {
            let occurrence = self.load(occurrence_id).await?;
            match self
                .records
                .update_occurrence(occurrence_id, occurrence.version, patch_for(&occurrence))
                .await
                .map_err(EscalationError::Records)?
            {
                UpdateOutcome::Applied(updated) => return Ok(updated),
                UpdateOutcome::Conflict => continue,
            }
        }
        Err(EscalationError::StoreContention(occurrence_id.clone()))
    }
}

/// Wave interval: `max(1 min, (scheduled_at − now) / 4)` clamped to the
/// provider's bounds.
fn wave_interval(
    provider: &ProviderConfig,
    scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Duration {
    let until = (scheduled_at - now).max(Duration::zero());
    let quarter = until / 4;
    let raw = quarter.max(Duration::minutes(1));
    let lower = Duration::minutes(provider.wave_interval_min.min(provider.wave_interval_max) as i64);
    let upper = Duration::minutes(provider.wave_interval_max.max(provider.wave_interval_min) as i64);
    raw.clamp(lower, upper)
}

/// Wave send times: wave 1 immediately, waves 2/3 only when they still land
/// before the shift starts.
fn planned_waves(
    scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
    interval: Duration,
) -> Vec<DateTime<Utc>> {
    let mut times = vec![now];
    for n in 1..3 {
        let at = now + interval * n;
        if at < scheduled_at {
            times.push(at);
        } else {
            break;
        }
    }
    times
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::InMemoryRecords;
    use crate::testutil::{occurrence_fixture, provider_fixture, staff_fixture};
    use crate::types::ProviderId;
    use covercall_queue::JobQueue;

    async fn controller_with(
        records: Arc<InMemoryRecords>,
    ) -> (EscalationController, Arc<JobQueue>) {
        let queue = Arc::new(JobQueue::in_memory().await.unwrap());
        let events = Arc::new(
            EventPublisher::new(queue.pool().clone()).await.unwrap(),
        );
        let controller = EscalationController::new(
            records,
            queue.clone(),
            events,
            Arc::new(LiveCallRegistry::new()),
            EngineConfig::default(),
        );
        (controller, queue)
    }

    fn seeded_records() -> Arc<InMemoryRecords> {
        let records = Arc::new(InMemoryRecords::new());
        records.insert_provider(provider_fixture("prov-1"));
        for staff in ["staff-a", "staff-b", "staff-c"] {
            records.insert_staff(staff_fixture(staff));
        }
        records.insert_occurrence(occurrence_fixture(
            "occ-1",
            "prov-1",
            &["staff-a", "staff-b", "staff-c"],
            Utc::now() + Duration::hours(4),
        ));
        records
    }

    #[tokio::test]
    async fn start_escalation_schedules_three_waves() {
        let records = seeded_records();
        let (controller, queue) = controller_with(records.clone()).await;
        let occ = OccurrenceId::from("occ-1");

        let epoch = controller.start_escalation(&occ).await.unwrap();
        assert_eq!(epoch, 1);

        for wave in 1..=3u8 {
            let job = queue
                .get(&wave_job_id(&occ, epoch, wave))
                .await
                .unwrap()
                .expect("wave job scheduled");
            assert_eq!(job.state, "scheduled");
        }
        let snapshot = records.occurrence_snapshot(&occ).unwrap();
        assert_eq!(snapshot.status, OccurrenceStatus::Open);
        assert_eq!(snapshot.escalation_epoch, 1);
    }

    #[tokio::test]
    async fn imminent_shift_gets_only_wave_one() {
        let records = seeded_records();
        records.insert_occurrence(occurrence_fixture(
            "occ-soon",
            "prov-1",
            &["staff-a"],
            Utc::now() + Duration::minutes(1),
        ));
        let (controller, queue) = controller_with(records).await;
        let occ = OccurrenceId::from("occ-soon");

        let epoch = controller.start_escalation(&occ).await.unwrap();
        assert!(queue.get(&wave_job_id(&occ, epoch, 1)).await.unwrap().is_some());
        assert!(queue.get(&wave_job_id(&occ, epoch, 2)).await.unwrap().is_none());
        assert!(queue.get(&wave_job_id(&occ, epoch, 3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn misconfigured_provider_is_rejected_without_state() {
        let records = Arc::new(InMemoryRecords::new());
        let mut provider = provider_fixture("prov-1");
        provider.message_template = "  ".into();
        records.insert_provider(provider);
        records.insert_occurrence(occurrence_fixture(
            "occ-1",
            "prov-1",
            &["staff-a"],
            Utc::now() + Duration::hours(2),
        ));
        let (controller, queue) = controller_with(records.clone()).await;
        let occ = OccurrenceId::from("occ-1");

        let err = controller.start_escalation(&occ).await.unwrap_err();
        assert!(matches!(err, EscalationError::ProviderMisconfigured { .. }));
        // No wave scheduled, no epoch bump.
        assert!(queue.get(&wave_job_id(&occ, 1, 1)).await.unwrap().is_none());
        assert_eq!(records.occurrence_snapshot(&occ).unwrap().escalation_epoch, 0);
    }

    #[tokio::test]
    async fn try_accept_assigns_exactly_once() {
        let records = seeded_records();
        let (controller, _queue) = controller_with(records.clone()).await;
        let occ = OccurrenceId::from("occ-1");
        controller.start_escalation(&occ).await.unwrap();

        let first = controller
            .try_accept(&occ, &StaffId::from("staff-b"), AcceptSource::SmsReply)
            .await
            .unwrap();
        assert_eq!(first, AcceptOutcome::Accepted);

        let second = controller
            .try_accept(&occ, &StaffId::from("staff-a"), AcceptSource::OutboundDtmf)
            .await
            .unwrap();
        assert_eq!(
            second,
            AcceptOutcome::AlreadyAssigned(StaffId::from("staff-b"))
        );

        let snapshot = records.occurrence_snapshot(&occ).unwrap();
        assert_eq!(snapshot.status, OccurrenceStatus::Assigned);
        assert_eq!(snapshot.assignee, Some(StaffId::from("staff-b")));
    }

    #[tokio::test]
    async fn try_accept_rejects_non_pool_staff() {
        let records = seeded_records();
        let (controller, _) = controller_with(records).await;
        let occ = OccurrenceId::from("occ-1");
        controller.start_escalation(&occ).await.unwrap();

        let outcome = controller
            .try_accept(&occ, &StaffId::from("staff-z"), AcceptSource::SmsReply)
            .await
            .unwrap();
        assert_eq!(outcome, AcceptOutcome::Ineligible);
    }

    #[tokio::test]
    async fn accept_cancels_scheduled_waves_and_bumps_epoch() {
        let records = seeded_records();
        let (controller, queue) = controller_with(records.clone()).await;
        let occ = OccurrenceId::from("occ-1");
        let epoch = controller.start_escalation(&occ).await.unwrap();

        controller
            .try_accept(&occ, &StaffId::from("staff-a"), AcceptSource::SmsReply)
            .await
            .unwrap();

        for wave in 1..=3u8 {
            let job = queue
                .get(&wave_job_id(&occ, epoch, wave))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(job.state, "cancelled", "wave {wave} should be swept");
        }
        let snapshot = records.occurrence_snapshot(&occ).unwrap();
        assert_eq!(snapshot.escalation_epoch, epoch + 1);

        // Confirmation enqueued for the winner.
        let confirm = queue
            .get(&confirmation_job_id(&occ, snapshot.escalation_epoch))
            .await
            .unwrap();
        assert!(confirm.is_some());
    }

    #[tokio::test]
    async fn cancel_escalation_closes_the_occurrence() {
        let records = seeded_records();
        let (controller, _) = controller_with(records.clone()).await;
        let occ = OccurrenceId::from("occ-1");
        controller.start_escalation(&occ).await.unwrap();

        controller
            .cancel_escalation(&occ, "shift withdrawn")
            .await
            .unwrap();
        let snapshot = records.occurrence_snapshot(&occ).unwrap();
        assert_eq!(snapshot.status, OccurrenceStatus::Cancelled);

        let outcome = controller
            .try_accept(&occ, &StaffId::from("staff-a"), AcceptSource::SmsReply)
            .await
            .unwrap();
        assert_eq!(outcome, AcceptOutcome::Closed);
    }

    #[tokio::test]
    async fn wave_complete_schedules_cascade_after_wait() {
        let records = seeded_records();
        let (controller, queue) = controller_with(records).await;
        let occ = OccurrenceId::from("occ-1");
        let epoch = controller.start_escalation(&occ).await.unwrap();

        controller
            .on_wave_complete(&SendWaveJob {
                occurrence_id: occ.clone(),
                provider_id: ProviderId::from("prov-1"),
                wave: 3,
                epoch,
                last_wave: true,
            })
            .await
            .unwrap();

        let job = queue
            .get(&cascade_job_id(&occ, epoch))
            .await
            .unwrap()
            .expect("cascade scheduled");
        // wait_minutes in the fixture is 5: the cascade must not be ready yet.
        assert!(job.run_at > Utc::now() + Duration::minutes(4));
    }

    #[tokio::test]
    async fn skipped_wave_three_starts_cascade_immediately() {
        let records = seeded_records();
        let (controller, queue) = controller_with(records).await;
        let occ = OccurrenceId::from("occ-1");
        let epoch = controller.start_escalation(&occ).await.unwrap();

        controller
            .on_wave_complete(&SendWaveJob {
                occurrence_id: occ.clone(),
                provider_id: ProviderId::from("prov-1"),
                wave: 1,
                epoch,
                last_wave: true,
            })
            .await
            .unwrap();

        let job = queue
            .get(&cascade_job_id(&occ, epoch))
            .await
            .unwrap()
            .expect("cascade scheduled");
        assert!(job.run_at <= Utc::now());
    }

    #[tokio::test]
    async fn stale_epoch_wave_complete_is_inert() {
        let records = seeded_records();
        let (controller, queue) = controller_with(records).await;
        let occ = OccurrenceId::from("occ-1");
        let epoch = controller.start_escalation(&occ).await.unwrap();

        controller
            .on_wave_complete(&SendWaveJob {
                occurrence_id: occ.clone(),
                provider_id: ProviderId::from("prov-1"),
                wave: 3,
                epoch: epoch - 1,
                last_wave: true,
            })
            .await
            .unwrap();
        assert!(queue.get(&cascade_job_id(&occ, epoch - 1)).await.unwrap().is_none());
    }

    #[test]
    fn wave_interval_respects_floor_and_clamp() {
        let provider = provider_fixture("prov-1");
        let now = Utc::now();
        // 8 hours out: quarter is 120 min, clamped to the provider max (30).
        assert_eq!(
            wave_interval(&provider, now + Duration::hours(8), now),
            Duration::minutes(30)
        );
        // 2 minutes out: quarter is under a minute, floored to 1 then
        // clamped up to the provider min (2).
        assert_eq!(
            wave_interval(&provider, now + Duration::minutes(2), now),
            Duration::minutes(2)
        );
    }
}
