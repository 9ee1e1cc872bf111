//! # Mid-call transfer to a representative
//!
//! When a caller chooses "talk to a representative" the coordinator:
//!
//! 1. stages the transfer in the *synchronous* pending cache (so the
//!    media-capture close handler defers its upload) and on the session,
//! 2. redirects the live carrier call to a `<Dial>` of the representative
//!    with a 30-second ring timeout, caller-ID set to the original caller,
//!    and an action URL reporting the dial result,
//! 3. on failure persists a park record so the caller holds with audio and
//!    an operator can pick them up later.
//!
//! Recording continuity: the pre-transfer leg was captured by the media
//! stream; the dial leg uses the carrier's native recording. Both archive
//! against the same root call id.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row, SqlitePool};
use tracing::{info, warn};

use covercall_escalation::carrier::twiml::{Dial, Twiml};
use covercall_escalation::carrier::VoiceCarrier;
use covercall_escalation::controller::EscalationController;
use covercall_escalation::events::{EventKind, EventRecord};
use covercall_escalation::records::{CallLogEntry, CallLogPatch};
use covercall_escalation::types::{CallOutcome, CallPurpose, CallSid, ProviderId};
use covercall_media::{CapturePipeline, PendingTransferCache};

use crate::error::{IvrError, Result};
use crate::prompts;
use crate::session::SessionRegistry;

const REPRESENTATIVE_RING_TIMEOUT_SECS: u32 = 30;

const HOLD_MESSAGE: &str =
    "All of our representatives are busy right now. Please stay on the line.";

/// A caller waiting for an operator pick-up.
#[derive(Debug, Clone, FromRow)]
pub struct ParkedCall {
    pub call_sid: String,
    pub caller_phone: String,
    pub provider_id: String,
    pub parked_at: DateTime<Utc>,
}

/// Executes transfers and tracks their outcomes.
pub struct TransferCoordinator {
    controller: Arc<EscalationController>,
    carrier: Arc<dyn VoiceCarrier>,
    pending: Arc<PendingTransferCache>,
    sessions: Arc<SessionRegistry>,
    capture: Arc<CapturePipeline>,
    pool: SqlitePool,
}

impl TransferCoordinator {
    pub async fn new(
        controller: Arc<EscalationController>,
        carrier: Arc<dyn VoiceCarrier>,
        pending: Arc<PendingTransferCache>,
        sessions: Arc<SessionRegistry>,
        capture: Arc<CapturePipeline>,
        pool: SqlitePool,
    ) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transfers (
                call_sid      TEXT PRIMARY KEY,
                root_call_sid TEXT NOT NULL,
                provider_id   TEXT NOT NULL,
                caller_phone  TEXT NOT NULL,
                state         TEXT NOT NULL,
                parked_at     TEXT,
                created_at    TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self {
            controller,
            carrier,
            pending,
            sessions,
            capture,
            pool,
        })
    }

    /// Stage and execute the hand-off for a live call.
    pub async fn begin(&self, call_sid: &CallSid) -> Result<()> {
        let session = self
            .sessions
            .get(call_sid)
            .ok_or_else(|| IvrError::UnknownSession(call_sid.to_string()))?;

        let provider_id = session
            .provider_id
            .clone()
            .or_else(|| session.candidate_providers.first().cloned())
            .unwrap_or_else(|| ProviderId::from("unattributed"));
        let representative = self
            .controller
            .records()
            .provider_config(&provider_id)
            .await
            .map_err(IvrError::Records)?
            .map(|p| p.representative_phone)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                IvrError::Records(anyhow::anyhow!(
                    "provider {provider_id} has no representative number"
                ))
            })?;

        // Order matters: the close handler must observe the flag before the
        // redirect tears the media stream down.
        self.pending.set(call_sid.as_str());
        self.sessions
            .with_mut(call_sid, |s| s.pending_transfer = true);

        sqlx::query(
            "INSERT OR REPLACE INTO transfers
                (call_sid, root_call_sid, provider_id, caller_phone, state, created_at)
             VALUES (?1, ?2, ?3, ?4, 'dialing', ?5)",
        )
        .bind(call_sid.as_str())
        .bind(session.root_call_sid.as_str())
        .bind(provider_id.as_str())
        .bind(&session.from_phone)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let action = format!(
            "{}/webhooks/transfer/complete?callSid={}",
            self.controller.config().base_url,
            call_sid
        );
        let xml = Twiml::new()
            .say(prompts::TRANSFER)
            .dial(Dial {
                number: representative,
                timeout_secs: REPRESENTATIVE_RING_TIMEOUT_SECS,
                caller_id: session.from_phone.clone(),
                action_url: action,
            })
            .to_xml();
        self.carrier
            .redirect(call_sid, &xml)
            .await
            .map_err(IvrError::Carrier)?;

        let mut entry = CallLogEntry::started(call_sid.clone(), CallPurpose::Transfer);
        entry.occurrence_id = session.occurrence_id.clone();
        entry.staff_id = session.staff_id.clone();
        if let Err(e) = self.controller.records().append_call_log(entry).await {
            warn!(call = %call_sid, error = %e, "transfer call log append failed");
        }

        self.controller
            .events()
            .publish(
                EventRecord::new(provider_id, EventKind::TransferInitiated)
                    .call(call_sid.clone())
                    .detail(serde_json::json!({ "caller": session.from_phone })),
            )
            .await;
        info!(call = %call_sid, "transfer dial started");
        Ok(())
    }

    /// Dial action webhook: the representative leg finished (or failed).
    /// Returns the control document for the remainder of the call.
    pub async fn on_dial_result(
        &self,
        call_sid: &CallSid,
        dial_status: &str,
        recording_url: Option<&str>,
    ) -> Result<String> {
        let row = sqlx::query(
            "SELECT provider_id, root_call_sid FROM transfers WHERE call_sid = ?1",
        )
        .bind(call_sid.as_str())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(Twiml::sorry_and_hangup());
        };
        let provider_id = ProviderId::from(row.get::<String, _>("provider_id"));
        let root_call_sid: String = row.get("root_call_sid");

        let connected = matches!(dial_status, "completed" | "answered" | "in-progress");
        if connected {
            sqlx::query("UPDATE transfers SET state = 'connected' WHERE call_sid = ?1")
                .bind(call_sid.as_str())
                .execute(&self.pool)
                .await?;

            // The final leg is over: flush the pre-transfer audio that the
            // stream close deferred. The dial leg itself was recorded by
            // the carrier (transfer_recording_uri).
            let deferred_uri = match self.capture.finalize_root(&root_call_sid).await {
                Ok(uri) => uri,
                Err(e) => {
                    warn!(root = %root_call_sid, error = %e,
                          "deferred recording flush failed");
                    None
                }
            };

            let patch = CallLogPatch {
                outcome: Some(CallOutcome::Completed),
                ended_at: Some(Utc::now()),
                recording_uri: deferred_uri,
                transfer_recording_uri: recording_url.map(|r| r.to_string()),
                ..CallLogPatch::default()
            };
            if let Err(e) = self
                .controller
                .records()
                .update_call_log(call_sid, patch)
                .await
            {
                warn!(call = %call_sid, error = %e, "transfer call log update failed");
            }

            self.controller
                .events()
                .publish(
                    EventRecord::new(provider_id, EventKind::TransferCompleted)
                        .call(call_sid.clone()),
                )
                .await;

            // The human conversation is over; the session is done.
            self.sessions.remove(call_sid);
            info!(call = %call_sid, "transfer completed");
            Ok(Twiml::new().say(prompts::GOODBYE).hangup().to_xml())
        } else {
            // Representative unavailable: park the caller.
            sqlx::query(
                "UPDATE transfers SET state = 'parked', parked_at = ?2 WHERE call_sid = ?1",
            )
            .bind(call_sid.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
            info!(call = %call_sid, dial_status, "representative unavailable, caller parked");
            Ok(self.hold_twiml(call_sid))
        }
    }

    /// Hold loop served while a caller is parked.
    pub fn hold_twiml(&self, call_sid: &CallSid) -> String {
        let hold_url = format!(
            "{}/webhooks/transfer/hold?callSid={}",
            self.controller.config().base_url,
            call_sid
        );
        Twiml::new()
            .say(HOLD_MESSAGE)
            .pause(20)
            .redirect(hold_url)
            .to_xml()
    }

    /// Callers currently parked, oldest first (operator pick-up list).
    pub async fn parked_calls(&self) -> Result<Vec<ParkedCall>> {
        let rows = sqlx::query_as::<_, ParkedCall>(
            "SELECT call_sid, caller_phone, provider_id, parked_at
             FROM transfers
             WHERE state = 'parked'
             ORDER BY parked_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// An operator took the parked caller.
    pub async fn mark_picked_up(&self, call_sid: &CallSid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE transfers SET state = 'picked_up' WHERE call_sid = ?1 AND state = 'parked'",
        )
        .bind(call_sid.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::IvrMachine;
    use covercall_escalation::carrier::RecordingCarrier;
    use covercall_escalation::config::EngineConfig;
    use covercall_escalation::events::EventPublisher;
    use covercall_escalation::live::LiveCallRegistry;
    use covercall_escalation::records::InMemoryRecords;
    use covercall_escalation::testutil::{occurrence_fixture, pin_for, provider_fixture, staff_fixture};
    use covercall_escalation::types::{OccurrenceStatus, StaffId};
    use covercall_queue::JobQueue;

    struct World {
        coordinator: TransferCoordinator,
        machine: IvrMachine,
        carrier: Arc<RecordingCarrier>,
        pending: Arc<PendingTransferCache>,
        sessions: Arc<SessionRegistry>,
    }

    async fn world() -> World {
        let records = Arc::new(InMemoryRecords::new());
        records.insert_provider(provider_fixture("prov-1"));
        records.insert_staff(staff_fixture("staff-a"));
        let mut occurrence = occurrence_fixture(
            "occ-1",
            "prov-1",
            &["staff-a"],
            Utc::now() + chrono::Duration::hours(6),
        );
        occurrence.status = OccurrenceStatus::Assigned;
        occurrence.assignee = Some(StaffId::from("staff-a"));
        records.insert_occurrence(occurrence);

        let queue = Arc::new(JobQueue::in_memory().await.unwrap());
        let events = Arc::new(EventPublisher::new(queue.pool().clone()).await.unwrap());
        let controller = Arc::new(EscalationController::new(
            records,
            queue.clone(),
            events,
            Arc::new(LiveCallRegistry::new()),
            EngineConfig::default(),
        ));
        let sessions = Arc::new(SessionRegistry::new());
        let carrier = Arc::new(RecordingCarrier::new());
        let pending = Arc::new(PendingTransferCache::new());
        let capture = Arc::new(
            CapturePipeline::new(
                queue.pool().clone(),
                pending.clone(),
                Arc::new(covercall_media::InMemoryRecordingStore::new()),
            )
            .await
            .unwrap(),
        );
        let coordinator = TransferCoordinator::new(
            controller.clone(),
            carrier.clone(),
            pending.clone(),
            sessions.clone(),
            capture,
            queue.pool().clone(),
        )
        .await
        .unwrap();
        let machine = IvrMachine::new(controller, sessions.clone());
        World {
            coordinator,
            machine,
            carrier,
            pending,
            sessions,
        }
    }

    fn sid() -> CallSid {
        CallSid::from("CA-ivr-9")
    }

    #[tokio::test]
    async fn begin_stages_flag_before_redirect() {
        let w = world().await;
        w.machine
            .on_call_start(&sid(), "+61400000001")
            .await
            .unwrap();
        w.machine
            .on_digits(&sid(), &pin_for("staff-a"))
            .await
            .unwrap();

        w.coordinator.begin(&sid()).await.unwrap();

        assert!(w.pending.is_pending(sid().as_str()));
        assert!(w.sessions.get(&sid()).unwrap().pending_transfer);

        let redirects = w.carrier.redirects();
        assert_eq!(redirects.len(), 1);
        assert!(redirects[0].twiml.contains("<Dial"));
        assert!(redirects[0].twiml.contains("timeout=\"30\""));
        assert!(redirects[0].twiml.contains("callerId=\"+61400000001\""));
        assert!(redirects[0]
            .twiml
            .contains("/webhooks/transfer/complete?callSid=CA-ivr-9"));
    }

    #[tokio::test]
    async fn successful_dial_completes_and_frees_session() {
        let w = world().await;
        w.machine
            .on_call_start(&sid(), "+61400000001")
            .await
            .unwrap();
        w.machine
            .on_digits(&sid(), &pin_for("staff-a"))
            .await
            .unwrap();
        w.coordinator.begin(&sid()).await.unwrap();

        let xml = w
            .coordinator
            .on_dial_result(&sid(), "completed", Some("https://carrier.test/rec/1"))
            .await
            .unwrap();
        assert!(xml.contains("<Hangup/>"));
        assert!(w.sessions.get(&sid()).is_none());
    }

    #[tokio::test]
    async fn failed_dial_parks_the_caller() {
        let w = world().await;
        w.machine
            .on_call_start(&sid(), "+61400000001")
            .await
            .unwrap();
        w.machine
            .on_digits(&sid(), &pin_for("staff-a"))
            .await
            .unwrap();
        w.coordinator.begin(&sid()).await.unwrap();

        let xml = w
            .coordinator
            .on_dial_result(&sid(), "no-answer", None)
            .await
            .unwrap();
        assert!(xml.contains("representatives are busy"));
        assert!(xml.contains("/webhooks/transfer/hold?callSid=CA-ivr-9"));

        let parked = w.coordinator.parked_calls().await.unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].caller_phone, "+61400000001");

        assert!(w.coordinator.mark_picked_up(&sid()).await.unwrap());
        assert!(w.coordinator.parked_calls().await.unwrap().is_empty());
    }

}
