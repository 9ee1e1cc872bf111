//! Property tests for the assignment invariants: for any interleaving of
//! SMS replies, DTMF presses, and operator acceptances, at most one
//! `try_accept` wins, the epoch only moves forward, and stale jobs stay
//! inert.

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::join_all;
use proptest::prelude::*;

use covercall_escalation::config::EngineConfig;
use covercall_escalation::controller::EscalationController;
use covercall_escalation::events::EventPublisher;
use covercall_escalation::jobs::wave_job_id;
use covercall_escalation::live::LiveCallRegistry;
use covercall_escalation::records::InMemoryRecords;
use covercall_escalation::testutil::{occurrence_fixture, provider_fixture, staff_fixture};
use covercall_escalation::types::{
    AcceptOutcome, AcceptSource, OccurrenceId, OccurrenceStatus, StaffId,
};
use covercall_queue::JobQueue;

struct World {
    controller: Arc<EscalationController>,
    records: Arc<InMemoryRecords>,
    queue: Arc<JobQueue>,
}

async fn world(pool_size: usize) -> World {
    let records = Arc::new(InMemoryRecords::new());
    records.insert_provider(provider_fixture("prov-1"));
    let pool: Vec<String> = (0..pool_size).map(|i| format!("staff-{i}")).collect();
    for staff in &pool {
        records.insert_staff(staff_fixture(staff));
    }
    let pool_refs: Vec<&str> = pool.iter().map(String::as_str).collect();
    records.insert_occurrence(occurrence_fixture(
        "occ-1",
        "prov-1",
        &pool_refs,
        Utc::now() + Duration::hours(4),
    ));
    let queue = Arc::new(JobQueue::in_memory().await.unwrap());
    let events = Arc::new(EventPublisher::new(queue.pool().clone()).await.unwrap());
    let controller = Arc::new(EscalationController::new(
        records.clone(),
        queue.clone(),
        events,
        Arc::new(LiveCallRegistry::new()),
        EngineConfig::default(),
    ));
    World {
        controller,
        records,
        queue,
    }
}

fn sources() -> impl Strategy<Value = AcceptSource> {
    prop_oneof![
        Just(AcceptSource::SmsReply),
        Just(AcceptSource::OutboundDtmf),
        Just(AcceptSource::InboundIvr),
        Just(AcceptSource::Operator),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// At most one concurrent acceptance wins; everyone else is told who
    /// holds the shift; the final assignee is the winner. Indices past the
    /// pool exercise the `Ineligible` path.
    #[test]
    fn single_assignment_under_interleaving(
        pool_size in 2usize..6,
        attempts in proptest::collection::vec((0usize..8, sources()), 1..12),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let w = world(pool_size).await;
            let occ = OccurrenceId::from("occ-1");
            w.controller.start_escalation(&occ).await.unwrap();

            let futures = attempts
                .iter()
                .map(|(staff_idx, source)| {
                    let controller = w.controller.clone();
                    let occ = occ.clone();
                    let staff = StaffId::from(format!("staff-{staff_idx}").as_str());
                    let source = *source;
                    async move { controller.try_accept(&occ, &staff, source).await.unwrap() }
                })
                .collect::<Vec<_>>();
            let outcomes = join_all(futures).await;

            let accepted: Vec<_> = outcomes
                .iter()
                .filter(|o| matches!(o, AcceptOutcome::Accepted))
                .collect();
            prop_assert!(accepted.len() <= 1, "multiple winners: {outcomes:?}");

            let snapshot = w.records.occurrence_snapshot(&occ).unwrap();
            if accepted.len() == 1 {
                prop_assert_eq!(snapshot.status, OccurrenceStatus::Assigned);
                prop_assert!(snapshot.assignee.is_some());
                // Every loser learned the winner's identity.
                for outcome in &outcomes {
                    if let AcceptOutcome::AlreadyAssigned(holder) = outcome {
                        prop_assert_eq!(Some(holder), snapshot.assignee.as_ref());
                    }
                }
            } else {
                // Only ineligible attempts: nothing must have been assigned.
                prop_assert!(snapshot.assignee.is_none());
            }
            Ok(())
        })?;
    }

    /// The escalation epoch is strictly increasing across restarts and
    /// acceptances.
    #[test]
    fn epoch_is_strictly_monotonic(restarts in 1usize..4) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let w = world(3).await;
            let occ = OccurrenceId::from("occ-1");

            let mut last_epoch = 0;
            for _ in 0..restarts {
                let epoch = w.controller.start_escalation(&occ).await.unwrap();
                prop_assert!(epoch > last_epoch, "epoch must increase");
                last_epoch = epoch;
            }

            w.controller
                .try_accept(&occ, &StaffId::from("staff-0"), AcceptSource::SmsReply)
                .await
                .unwrap();
            let snapshot = w.records.occurrence_snapshot(&occ).unwrap();
            prop_assert!(snapshot.escalation_epoch > last_epoch);
            Ok(())
        })?;
    }
}

/// After acceptance, every queued wave for the occurrence is cancelled and
/// re-dispatching a stale wave sends nothing (cancellation completeness).
#[tokio::test]
async fn cancellation_is_complete_after_accept() {
    let w = world(3).await;
    let occ = OccurrenceId::from("occ-1");
    let epoch = w.controller.start_escalation(&occ).await.unwrap();

    w.controller
        .try_accept(&occ, &StaffId::from("staff-1"), AcceptSource::OutboundDtmf)
        .await
        .unwrap();

    for wave in 1..=3u8 {
        let job = w
            .queue
            .get(&wave_job_id(&occ, epoch, wave))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.state, "cancelled", "wave {wave} must be swept");
    }
    // Nothing claimable remains for this occurrence.
    assert!(w.queue.claim("sms-waves").await.unwrap().is_none());
}

/// Re-enqueueing the same deterministic job id never duplicates work.
#[tokio::test]
async fn duplicate_job_ids_do_not_duplicate_jobs() {
    let w = world(2).await;
    let occ = OccurrenceId::from("occ-1");
    let epoch = w.controller.start_escalation(&occ).await.unwrap();
    // A second start at the same epoch would need the same job ids; instead
    // the controller bumps the epoch, and the stale jobs are dropped at
    // dispatch. Simulate the "same id re-enqueued" case directly.
    let before = w.queue.stats().await.unwrap();
    let result = w
        .queue
        .enqueue(
            "sms-waves",
            &serde_json::json!({"dup": true}),
            Utc::now(),
            covercall_queue::JobOptions {
                job_id: Some(wave_job_id(&occ, epoch, 1)),
                ..covercall_queue::JobOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(!result.is_created());
    let after = w.queue.stats().await.unwrap();
    assert_eq!(before, after);
}
