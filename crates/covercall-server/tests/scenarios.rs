//! End-to-end escalation scenarios driven through the real workers over
//! in-memory seams: records store with CAS, recording carrier, null TTS,
//! in-memory recording archive. Queues are drained deterministically by
//! claiming jobs and dispatching them to the same handlers the server
//! registers.

use std::sync::Arc;

use chrono::{Duration, Utc};

use covercall_escalation::carrier::{CarrierCallStatus, RecordingCarrier};
use covercall_escalation::config::EngineConfig;
use covercall_escalation::controller::EscalationController;
use covercall_escalation::events::{EventKind, EventPublisher};
use covercall_escalation::jobs::{OutboundJob, QUEUE_CONFIRMATION, QUEUE_OUTBOUND, QUEUE_SMS_WAVES};
use covercall_escalation::live::LiveCallRegistry;
use covercall_escalation::outbound::OutboundOrchestrator;
use covercall_escalation::records::InMemoryRecords;
use covercall_escalation::sms::{ConfirmationSmsWorker, InboundSmsHandler, SmsWaveWorker};
use covercall_escalation::store::EngineStore;
use covercall_escalation::testutil::{
    occurrence_fixture, phone_for, pin_for, provider_fixture, staff_fixture,
};
use covercall_escalation::tts::{CallAudioStore, NullTts, PromptCache};
use covercall_escalation::types::{
    AcceptSource, CallOutcome, CallSid, OccurrenceId, OccurrenceStatus, ProviderId, StaffId,
};
use covercall_ivr::{IvrMachine, SessionRegistry, StepAction, TransferCoordinator};
use covercall_media::{
    CapturePipeline, CloseOutcome, InMemoryRecordingStore, MediaTrack, PendingTransferCache,
};
use covercall_queue::{JobHandler, JobOptions, JobPriority, JobQueue};

struct World {
    controller: Arc<EscalationController>,
    records: Arc<InMemoryRecords>,
    carrier: Arc<RecordingCarrier>,
    queue: Arc<JobQueue>,
    orchestrator: Arc<OutboundOrchestrator>,
    wave_worker: Arc<SmsWaveWorker>,
    confirmation_worker: Arc<ConfirmationSmsWorker>,
    inbound_sms: Arc<InboundSmsHandler>,
    machine: Arc<IvrMachine>,
    transfer: Arc<TransferCoordinator>,
    capture: Arc<CapturePipeline>,
    recordings: Arc<InMemoryRecordingStore>,
}

async fn world(pool: &[&str], max_rounds: u32) -> World {
    let records = Arc::new(InMemoryRecords::new());
    let mut provider = provider_fixture("prov-1");
    provider.max_rounds = max_rounds;
    records.insert_provider(provider);
    for staff in pool {
        records.insert_staff(staff_fixture(staff));
    }
    records.insert_occurrence(occurrence_fixture(
        "occ-1",
        "prov-1",
        pool,
        Utc::now() + Duration::hours(6),
    ));

    let queue = Arc::new(JobQueue::in_memory().await.unwrap());
    let pool_db = queue.pool().clone();
    let events = Arc::new(EventPublisher::new(pool_db.clone()).await.unwrap());
    let controller = Arc::new(EscalationController::new(
        records.clone(),
        queue.clone(),
        events,
        Arc::new(LiveCallRegistry::new()),
        EngineConfig::default(),
    ));
    let store = EngineStore::new(pool_db.clone()).await.unwrap();
    let carrier = Arc::new(RecordingCarrier::new());
    let orchestrator = Arc::new(OutboundOrchestrator::new(
        controller.clone(),
        carrier.clone(),
        Arc::new(NullTts),
        Arc::new(PromptCache::new()),
        Arc::new(CallAudioStore::new()),
        store.clone(),
    ));
    let wave_worker = Arc::new(SmsWaveWorker::new(controller.clone(), carrier.clone()));
    let confirmation_worker = Arc::new(ConfirmationSmsWorker::new(
        controller.clone(),
        carrier.clone(),
    ));
    let inbound_sms = Arc::new(InboundSmsHandler::new(controller.clone(), store));

    let sessions = Arc::new(SessionRegistry::new());
    let machine = Arc::new(IvrMachine::new(controller.clone(), sessions.clone()));
    let pending = Arc::new(PendingTransferCache::new());
    let recordings = Arc::new(InMemoryRecordingStore::new());
    let capture = Arc::new(
        CapturePipeline::new(pool_db.clone(), pending.clone(), recordings.clone())
            .await
            .unwrap(),
    );
    let transfer = Arc::new(
        TransferCoordinator::new(
            controller.clone(),
            carrier.clone(),
            pending,
            sessions,
            capture.clone(),
            pool_db,
        )
        .await
        .unwrap(),
    );

    World {
        controller,
        records,
        carrier,
        queue,
        orchestrator,
        wave_worker,
        confirmation_worker,
        inbound_sms,
        machine,
        transfer,
        capture,
        recordings,
    }
}

/// Claim-and-dispatch every ready job until all queues are quiet.
async fn drain(w: &World) {
    loop {
        let mut progressed = false;
        if let Some(job) = w.queue.claim(QUEUE_SMS_WAVES).await.unwrap() {
            let id = job.job_id().to_string();
            w.wave_worker.handle(job).await.unwrap();
            w.queue.complete(&id).await.unwrap();
            progressed = true;
        }
        if let Some(job) = w.queue.claim(QUEUE_OUTBOUND).await.unwrap() {
            let id = job.job_id().to_string();
            w.orchestrator.handle(job).await.unwrap();
            w.queue.complete(&id).await.unwrap();
            progressed = true;
        }
        if let Some(job) = w.queue.claim(QUEUE_CONFIRMATION).await.unwrap() {
            let id = job.job_id().to_string();
            w.confirmation_worker.handle(job).await.unwrap();
            w.queue.complete(&id).await.unwrap();
            progressed = true;
        }
        if !progressed {
            break;
        }
    }
}

fn occ() -> OccurrenceId {
    OccurrenceId::from("occ-1")
}

/// Simulate the wait-elapsed cascade start (the delay itself is covered by
/// controller unit tests; here the job simply becomes due).
async fn elapse_wait_and_start_cascade(w: &World, epoch: i64) {
    w.queue
        .enqueue(
            QUEUE_OUTBOUND,
            &OutboundJob::CascadeStart {
                occurrence_id: occ(),
                epoch,
            },
            Utc::now(),
            JobOptions {
                job_id: Some(format!("test-cascade:{epoch}")),
                subject: Some(occ().to_string()),
                priority: JobPriority::High,
                max_attempts: None,
            },
        )
        .await
        .unwrap();
    drain(w).await;
}

async fn provider_events(w: &World) -> Vec<EventKind> {
    w.controller
        .events()
        .history(&ProviderId::from("prov-1"))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect()
}

// Scenario 1: SMS acceptance on wave 1.
#[tokio::test]
async fn sms_acceptance_on_wave_one() {
    let w = world(&["staff-a", "staff-b", "staff-c"], 2).await;
    w.controller.start_escalation(&occ()).await.unwrap();
    drain(&w).await;

    // Wave 1 texted the whole pool; waves 2 and 3 are still in the future.
    assert_eq!(w.carrier.sms_sent().len(), 3);

    let result = w
        .inbound_sms
        .handle_reply(&phone_for("staff-a"), "YES")
        .await
        .unwrap();
    assert_eq!(
        result.disposition,
        covercall_escalation::sms::SmsDisposition::Accepted
    );
    drain(&w).await;

    let snapshot = w.records.occurrence_snapshot(&occ()).unwrap();
    assert_eq!(snapshot.status, OccurrenceStatus::Assigned);
    assert_eq!(snapshot.assignee, Some(StaffId::from("staff-a")));

    // Exactly one confirmation SMS, to the winner; no wave 2/3 texts.
    let sms = w.carrier.sms_sent();
    assert_eq!(sms.len(), 4);
    assert_eq!(sms[3].to, phone_for("staff-a"));
    assert!(sms[3].body.contains("confirmed"));

    let events = provider_events(&w).await;
    assert!(events.contains(&EventKind::ShiftFilled));
    // SMS path: no voice authentication event.
    assert!(!events.contains(&EventKind::CallAuthenticated));
}

// Scenario 2: no SMS replies; acceptance on outbound round 2.
#[tokio::test]
async fn acceptance_on_outbound_round_two() {
    let w = world(&["staff-a", "staff-b"], 3).await;
    let epoch = w.controller.start_escalation(&occ()).await.unwrap();
    drain(&w).await;
    elapse_wait_and_start_cascade(&w, epoch).await;

    // Round 1, staff-a: rings out.
    let call1 = w.carrier.calls_placed()[0].call_sid.clone();
    w.orchestrator
        .on_status(&call1, CarrierCallStatus::NoAnswer)
        .await
        .unwrap();
    drain(&w).await;

    // Round 1, staff-b: answers and declines.
    let call2 = w.carrier.calls_placed()[1].call_sid.clone();
    w.orchestrator.on_answer(&call2).await.unwrap();
    w.orchestrator.on_response(&call2, Some("2")).await.unwrap();
    drain(&w).await;

    // Round 2, staff-a: answers and accepts.
    let call3 = w.carrier.calls_placed()[2].call_sid.clone();
    w.orchestrator.on_answer(&call3).await.unwrap();
    let xml = w.orchestrator.on_response(&call3, Some("1")).await.unwrap();
    assert!(xml.contains("accepted the shift"));
    drain(&w).await;

    assert_eq!(w.carrier.calls_placed().len(), 3, "exactly three offers");
    let snapshot = w.records.occurrence_snapshot(&occ()).unwrap();
    assert_eq!(snapshot.status, OccurrenceStatus::Assigned);
    assert_eq!(snapshot.assignee, Some(StaffId::from("staff-a")));

    // Call log outcomes in order.
    let outcomes: Vec<_> = w
        .records
        .call_log_snapshot()
        .into_iter()
        .map(|e| e.outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![
            Some(CallOutcome::NoAnswer),
            Some(CallOutcome::Declined),
            Some(CallOutcome::Accepted),
        ]
    );

    // One confirmation SMS to the winner.
    let sms = w.carrier.sms_sent();
    let confirmations: Vec<_> = sms.iter().filter(|s| s.body.contains("confirmed")).collect();
    assert_eq!(confirmations.len(), 1);
    assert_eq!(confirmations[0].to, phone_for("staff-a"));
}

// Scenario 3: SMS YES and DTMF 1 race; exactly one winner.
#[tokio::test]
async fn race_between_sms_and_dtmf() {
    let w = world(&["staff-a", "staff-b"], 2).await;
    let epoch = w.controller.start_escalation(&occ()).await.unwrap();
    drain(&w).await;
    elapse_wait_and_start_cascade(&w, epoch).await;

    // staff-a has the offer call up; staff-b texts YES at the same moment.
    let call = w.carrier.calls_placed()[0].call_sid.clone();
    w.orchestrator.on_answer(&call).await.unwrap();

    let staff_b_phone = phone_for("staff-b");
    let (sms_result, dtmf_xml) = tokio::join!(
        w.inbound_sms.handle_reply(&staff_b_phone, "YES"),
        w.orchestrator.on_response(&call, Some("1")),
    );
    let sms_result = sms_result.unwrap();
    let dtmf_xml = dtmf_xml.unwrap();
    drain(&w).await;

    let snapshot = w.records.occurrence_snapshot(&occ()).unwrap();
    assert_eq!(snapshot.status, OccurrenceStatus::Assigned);
    let winner = snapshot.assignee.clone().expect("someone won");

    let sms_won =
        sms_result.disposition == covercall_escalation::sms::SmsDisposition::Accepted;
    let dtmf_won = dtmf_xml.contains("accepted the shift");
    assert!(sms_won ^ dtmf_won, "exactly one path wins the race");
    if sms_won {
        assert_eq!(winner, StaffId::from("staff-b"));
        assert!(dtmf_xml.contains("just been taken"));
    } else {
        assert_eq!(winner, StaffId::from("staff-a"));
        assert_eq!(
            sms_result.disposition,
            covercall_escalation::sms::SmsDisposition::AlreadyAssigned
        );
    }

    // Both attempts are on record: the offer call log row has an outcome.
    let log = w.records.call_log_snapshot();
    assert_eq!(log.len(), 1);
    assert!(log[0].outcome.is_some());
}

// Scenario 4: transfer continuity across legs.
#[tokio::test]
async fn transfer_keeps_recording_continuity() {
    let w = world(&["staff-a"], 2).await;
    let sid = CallSid::from("CA-transfer-1");

    // The caller owns today's shift; they dial in to hand it to a human.
    let mut assigned = occurrence_fixture(
        "occ-1",
        "prov-1",
        &["staff-a"],
        Utc::now() + Duration::hours(6),
    );
    assigned.status = OccurrenceStatus::Assigned;
    assigned.assignee = Some(StaffId::from("staff-a"));
    let job_code = assigned.job_code.clone();
    w.records.insert_occurrence(assigned);

    w.capture.begin(sid.as_str(), sid.as_str());
    w.machine
        .on_call_start(&sid, &phone_for("staff-a"))
        .await
        .unwrap();
    w.capture.append(sid.as_str(), MediaTrack::Inbound, &[1, 2, 3, 4]);
    w.capture.append(sid.as_str(), MediaTrack::Outbound, &[9, 9]);

    w.machine
        .on_digits(&sid, &pin_for("staff-a"))
        .await
        .unwrap();
    w.machine
        .on_digits(&sid, &format!("{job_code}#"))
        .await
        .unwrap();
    w.machine.on_digits(&sid, "1").await.unwrap();
    // "Talk to a representative".
    let step = w.machine.on_digits(&sid, "3").await.unwrap();
    assert_eq!(step.action, StepAction::BeginTransfer);

    w.transfer.begin(&sid).await.unwrap();

    // The WebSocket close observes the staged flag and defers the upload.
    let outcome = w.capture.close(sid.as_str()).await.unwrap();
    assert_eq!(outcome, CloseOutcome::DeferredForTransfer);
    assert!(w.recordings.is_empty(), "nothing archived mid-transfer");

    // Representative answers after a while; dial leg ends.
    let xml = w
        .transfer
        .on_dial_result(&sid, "completed", Some("https://carrier.test/rec/99"))
        .await
        .unwrap();
    assert!(xml.contains("<Hangup/>"));

    // Exactly one WAV, containing the pre-transfer audio from both tracks.
    assert_eq!(w.recordings.len(), 1);
    let wav = w
        .recordings
        .object(&format!("recordings/{}.wav", sid))
        .unwrap();
    assert_eq!(&wav[58..60], &[1, 9], "caller left, bridge right");

    let events = provider_events(&w).await;
    assert!(events.contains(&EventKind::TransferInitiated));
    assert!(events.contains(&EventKind::TransferCompleted));
}

// Scenario 5: everyone declines every round; the occurrence exhausts.
#[tokio::test]
async fn exhaustion_after_all_rounds() {
    let pool = ["staff-a", "staff-b", "staff-c", "staff-d"];
    let w = world(&pool, 2).await;
    let epoch = w.controller.start_escalation(&occ()).await.unwrap();
    drain(&w).await;
    elapse_wait_and_start_cascade(&w, epoch).await;

    let mut handled = 0;
    while handled < 16 {
        let calls = w.carrier.calls_placed();
        let Some(last) = calls.get(handled) else { break };
        let sid = last.call_sid.clone();
        w.orchestrator.on_answer(&sid).await.unwrap();
        w.orchestrator.on_response(&sid, Some("2")).await.unwrap();
        drain(&w).await;
        handled += 1;
    }

    // pool 4 × rounds 2 = 8 offers, in order.
    let calls = w.carrier.calls_placed();
    assert_eq!(calls.len(), 8);
    let expected: Vec<String> = pool
        .iter()
        .chain(pool.iter())
        .map(|s| phone_for(s))
        .collect();
    for (call, to) in calls.iter().zip(expected.iter()) {
        assert_eq!(&call.request.to, to);
    }

    let snapshot = w.records.occurrence_snapshot(&occ()).unwrap();
    assert_eq!(snapshot.status, OccurrenceStatus::UnfilledAfterCalls);
    let events = provider_events(&w).await;
    assert!(events.contains(&EventKind::OutboundAllRoundsExhausted));
}

// Scenario 6: invalid DTMF re-prompts once, then the 1 still accepts.
#[tokio::test]
async fn invalid_digit_then_accept() {
    let w = world(&["staff-a", "staff-b"], 2).await;
    let epoch = w.controller.start_escalation(&occ()).await.unwrap();
    drain(&w).await;
    elapse_wait_and_start_cascade(&w, epoch).await;

    let call = w.carrier.calls_placed()[0].call_sid.clone();
    w.orchestrator.on_answer(&call).await.unwrap();

    let xml = w.orchestrator.on_response(&call, Some("5")).await.unwrap();
    assert!(xml.contains("<Gather"), "one re-prompt");
    let xml = w.orchestrator.on_response(&call, Some("1")).await.unwrap();
    assert!(xml.contains("accepted the shift"));

    let snapshot = w.records.occurrence_snapshot(&occ()).unwrap();
    assert_eq!(snapshot.assignee, Some(StaffId::from("staff-a")));
    w.controller
        .try_accept(&occ(), &StaffId::from("staff-b"), AcceptSource::Operator)
        .await
        .map(|outcome| {
            assert!(matches!(
                outcome,
                covercall_escalation::types::AcceptOutcome::AlreadyAssigned(_)
            ))
        })
        .unwrap();
}
