//! # SMS Wave Worker & inbound reply handling
//!
//! Wave jobs render the provider template for every pool member with a
//! valid regional number, send through the carrier, record the sends, and
//! report wave completion to the controller. Replies arrive at the SMS
//! webhook, are classified against the keyword sets, correlated to the most
//! recent open wave for the sender's number, and either drive `try_accept`
//! or a decline/help reply.

mod classify;

pub use classify::{classify, ReplyIntent};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use covercall_queue::{ClaimedJob, JobHandler};
use tracing::{debug, info, warn};

use crate::carrier::SmsCarrier;
use crate::controller::EscalationController;
use crate::error::EscalationError;
use crate::events::{EventKind, EventRecord};
use crate::jobs::{ConfirmationSmsJob, SendWaveJob};
use crate::phone::PhoneValidator;
use crate::records::SmsLogEntry;
use crate::store::EngineStore;
use crate::template::{self, TemplateVars};
use crate::types::{AcceptOutcome, AcceptSource};

/// Confirmation template for the winning responder.
const CONFIRMATION_TEMPLATE: &str = "Thanks {employeeName}! You are confirmed for {patientName} on {date}, {startTime} to {endTime}, in {suburb}.";

/// What the webhook should text back for an unmatched reply.
const NO_MATCH_REPLY: &str =
    "We couldn't match your reply to an open shift. Please contact your coordinator.";
const HELP_REPLY: &str =
    "Reply YES to accept an offered shift or NO to decline. For anything else call your coordinator.";
const DECLINE_ACK_REPLY: &str = "Thanks, we've noted you can't take this shift.";
const ACCEPT_ACK_REPLY: &str =
    "You've got the shift - a confirmation message is on its way.";
const TAKEN_REPLY: &str = "Sorry, that shift has already been assigned.";
const CLOSED_REPLY: &str = "That shift is no longer open.";

/// Handler for `SendWave` jobs on the `sms-waves` queue.
pub struct SmsWaveWorker {
    controller: Arc<EscalationController>,
    carrier: Arc<dyn SmsCarrier>,
    validator: PhoneValidator,
}

impl SmsWaveWorker {
    pub fn new(controller: Arc<EscalationController>, carrier: Arc<dyn SmsCarrier>) -> Self {
        let validator = PhoneValidator::new(
            controller.config().allowed_country_prefixes.clone(),
        );
        Self {
            controller,
            carrier,
            validator,
        }
    }

    async fn send_wave(&self, job: SendWaveJob) -> anyhow::Result<()> {
        let records = self.controller.records();
        let Some(occurrence) = records.occurrence(&job.occurrence_id).await? else {
            debug!(occurrence = %job.occurrence_id, "occurrence vanished, wave dropped");
            return Ok(());
        };
        if occurrence.escalation_epoch != job.epoch || occurrence.status.is_terminal() {
            debug!(occurrence = %job.occurrence_id, wave = job.wave, "stale wave dropped");
            return Ok(());
        }
        let Some(provider) = records.provider_config(&occurrence.provider_id).await? else {
            warn!(provider = %occurrence.provider_id, "provider config missing mid-wave");
            return Ok(());
        };

        let mut sent = 0usize;
        let mut failed = 0usize;
        for staff_id in &occurrence.pool {
            let Some(staff) = records.staff(staff_id).await? else {
                warn!(staff = %staff_id, "pool member not found, skipped");
                continue;
            };
            if !self.validator.is_valid(&staff.phone_e164) {
                debug!(staff = %staff_id, phone = %staff.phone_e164, "invalid number skipped");
                continue;
            }
            let vars = TemplateVars::for_offer(&occurrence, &staff);
            let body = template::render(&provider.message_template, &vars);
            let delivered = match self
                .carrier
                .send_sms(&staff.phone_e164, &provider.sms_sender, &body)
                .await
            {
                Ok(_) => {
                    sent += 1;
                    true
                }
                Err(e) => {
                    warn!(staff = %staff_id, error = %e, "wave sms send failed");
                    failed += 1;
                    false
                }
            };
            records
                .append_sms_log(SmsLogEntry {
                    occurrence_id: Some(occurrence.occurrence_id.clone()),
                    staff_id: Some(staff.staff_id.clone()),
                    phone: staff.phone_e164.clone(),
                    wave: Some(job.wave),
                    body,
                    accepted_by_carrier: delivered,
                    sent_at: Utc::now(),
                })
                .await?;
            if delivered {
                self.controller
                    .events()
                    .publish(
                        EventRecord::new(occurrence.provider_id.clone(), EventKind::StaffNotified)
                            .occurrence(occurrence.occurrence_id.clone())
                            .detail(serde_json::json!({
                                "staff_id": staff.staff_id.as_str(),
                                "wave": job.wave,
                            })),
                    )
                    .await;
            }
        }

        // A wave where nothing went out is a transient failure worth a
        // retry; partial delivery counts as sent (re-running would double
        // texts to the staff already reached).
        if sent == 0 && failed > 0 {
            anyhow::bail!("wave {} delivered nothing ({failed} failures)", job.wave);
        }

        info!(occurrence = %job.occurrence_id, wave = job.wave, sent, failed, "wave sent");
        if self
            .controller
            .mark_wave_sent(&job.occurrence_id, job.epoch, job.wave)
            .await?
        {
            self.controller.on_wave_complete(&job).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for SmsWaveWorker {
    async fn handle(&self, job: ClaimedJob) -> anyhow::Result<()> {
        let payload: SendWaveJob = job.deserialize()?;
        self.send_wave(payload).await
    }
}

/// Handler for the `confirmation-sms` queue.
pub struct ConfirmationSmsWorker {
    controller: Arc<EscalationController>,
    carrier: Arc<dyn SmsCarrier>,
}

impl ConfirmationSmsWorker {
    pub fn new(controller: Arc<EscalationController>, carrier: Arc<dyn SmsCarrier>) -> Self {
        Self { controller, carrier }
    }
}

#[async_trait]
impl JobHandler for ConfirmationSmsWorker {
    async fn handle(&self, job: ClaimedJob) -> anyhow::Result<()> {
        let payload: ConfirmationSmsJob = job.deserialize()?;
        let records = self.controller.records();

        let Some(occurrence) = records.occurrence(&payload.occurrence_id).await? else {
            return Ok(());
        };
        // Only confirm the staff member who actually holds the shift.
        if occurrence.assignee.as_ref() != Some(&payload.staff_id) {
            debug!(occurrence = %payload.occurrence_id, "assignee changed, confirmation dropped");
            return Ok(());
        }
        let Some(staff) = records.staff(&payload.staff_id).await? else {
            return Ok(());
        };
        let Some(provider) = records.provider_config(&occurrence.provider_id).await? else {
            return Ok(());
        };

        let vars = TemplateVars::for_offer(&occurrence, &staff);
        let body = template::render(CONFIRMATION_TEMPLATE, &vars);
        self.carrier
            .send_sms(&staff.phone_e164, &provider.sms_sender, &body)
            .await?;
        records
            .append_sms_log(SmsLogEntry {
                occurrence_id: Some(occurrence.occurrence_id.clone()),
                staff_id: Some(staff.staff_id.clone()),
                phone: staff.phone_e164.clone(),
                wave: None,
                body,
                accepted_by_carrier: true,
                sent_at: Utc::now(),
            })
            .await?;
        info!(occurrence = %payload.occurrence_id, staff = %payload.staff_id,
              "confirmation sms sent");
        Ok(())
    }
}

/// Outcome of handling one inbound SMS, with the reply body (if any) the
/// webhook should text back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSmsResult {
    pub disposition: SmsDisposition,
    pub reply: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsDisposition {
    Accepted,
    AlreadyAssigned,
    Declined,
    Closed,
    NoMatch,
    HelpSent,
    Ignored,
}

/// Webhook-side reply handling.
pub struct InboundSmsHandler {
    controller: Arc<EscalationController>,
    store: EngineStore,
}

impl InboundSmsHandler {
    pub fn new(controller: Arc<EscalationController>, store: EngineStore) -> Self {
        Self { controller, store }
    }

    pub async fn handle_reply(
        &self,
        from: &str,
        body: &str,
    ) -> crate::error::Result<InboundSmsResult> {
        let config = self.controller.config();
        let records = self.controller.records();
        let phone = PhoneValidator::normalize(from);

        let intent = classify(body, &config.accept_keywords, &config.decline_keywords);
        let staff = records
            .staff_by_phone(&phone)
            .await
            .map_err(EscalationError::Records)?;
        let Some(staff) = staff else {
            // Unknown numbers get the help reply at most once a day.
            return self.unknown_number_reply(&phone).await;
        };

        let correlation = records
            .latest_open_wave_for_phone(&phone)
            .await
            .map_err(EscalationError::Records)?;

        match intent {
            ReplyIntent::Accept => {
                let Some(correlation) = correlation else {
                    return Ok(InboundSmsResult {
                        disposition: SmsDisposition::NoMatch,
                        reply: Some(NO_MATCH_REPLY.to_string()),
                    });
                };
                let outcome = self
                    .controller
                    .try_accept(
                        &correlation.occurrence_id,
                        &staff.staff_id,
                        AcceptSource::SmsReply,
                    )
                    .await?;
                Ok(match outcome {
                    AcceptOutcome::Accepted => InboundSmsResult {
                        disposition: SmsDisposition::Accepted,
                        reply: Some(ACCEPT_ACK_REPLY.to_string()),
                    },
                    AcceptOutcome::AlreadyAssigned(_) => InboundSmsResult {
                        disposition: SmsDisposition::AlreadyAssigned,
                        reply: Some(TAKEN_REPLY.to_string()),
                    },
                    AcceptOutcome::Ineligible => InboundSmsResult {
                        disposition: SmsDisposition::NoMatch,
                        reply: Some(NO_MATCH_REPLY.to_string()),
                    },
                    AcceptOutcome::Closed => InboundSmsResult {
                        disposition: SmsDisposition::Closed,
                        reply: Some(CLOSED_REPLY.to_string()),
                    },
                })
            }
            ReplyIntent::Decline => {
                if let Some(correlation) = correlation {
                    info!(occurrence = %correlation.occurrence_id, staff = %staff.staff_id,
                          "shift declined by sms");
                    if let Some(occurrence) = records
                        .occurrence(&correlation.occurrence_id)
                        .await
                        .map_err(EscalationError::Records)?
                    {
                        self.controller
                            .events()
                            .publish(
                                EventRecord::new(
                                    occurrence.provider_id.clone(),
                                    EventKind::IntentDetected,
                                )
                                .occurrence(correlation.occurrence_id.clone())
                                .detail(serde_json::json!({
                                    "intent": "decline",
                                    "staff_id": staff.staff_id.as_str(),
                                })),
                            )
                            .await;
                    }
                }
                Ok(InboundSmsResult {
                    disposition: SmsDisposition::Declined,
                    reply: Some(DECLINE_ACK_REPLY.to_string()),
                })
            }
            ReplyIntent::Unknown => self.unknown_number_reply(&phone).await,
        }
    }

    async fn unknown_number_reply(&self, phone: &str) -> crate::error::Result<InboundSmsResult> {
        let due = self
            .store
            .help_reply_due(phone, self.controller.config().help_reply_interval)
            .await?;
        if due {
            Ok(InboundSmsResult {
                disposition: SmsDisposition::HelpSent,
                reply: Some(HELP_REPLY.to_string()),
            })
        } else {
            Ok(InboundSmsResult {
                disposition: SmsDisposition::Ignored,
                reply: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::RecordingCarrier;
    use crate::config::EngineConfig;
    use crate::events::EventPublisher;
    use crate::live::LiveCallRegistry;
    use crate::records::InMemoryRecords;
    use crate::testutil::{occurrence_fixture, phone_for, provider_fixture, staff_fixture};
    use crate::types::{OccurrenceId, OccurrenceStatus, StaffId};
    use chrono::Duration;
    use covercall_queue::JobQueue;

    struct World {
        controller: Arc<EscalationController>,
        records: Arc<InMemoryRecords>,
        carrier: Arc<RecordingCarrier>,
        store: EngineStore,
        queue: Arc<JobQueue>,
    }

    async fn world() -> World {
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
        let queue = Arc::new(JobQueue::in_memory().await.unwrap());
        let events = Arc::new(EventPublisher::new(queue.pool().clone()).await.unwrap());
        let store = EngineStore::new(queue.pool().clone()).await.unwrap();
        let controller = Arc::new(EscalationController::new(
            records.clone(),
            queue.clone(),
            events,
            Arc::new(LiveCallRegistry::new()),
            EngineConfig::default(),
        ));
        let carrier = Arc::new(RecordingCarrier::new());
        World {
            controller,
            records,
            carrier,
            store,
            queue,
        }
    }

    fn wave_job(epoch: i64, wave: u8, last: bool) -> SendWaveJob {
        SendWaveJob {
            occurrence_id: OccurrenceId::from("occ-1"),
            provider_id: crate::types::ProviderId::from("prov-1"),
            wave,
            epoch,
            last_wave: last,
        }
    }

    #[tokio::test]
    async fn wave_texts_every_valid_pool_member() {
        let w = world().await;
        let epoch = w
            .controller
            .start_escalation(&OccurrenceId::from("occ-1"))
            .await
            .unwrap();
        let worker = SmsWaveWorker::new(w.controller.clone(), w.carrier.clone());

        worker.send_wave(wave_job(epoch, 1, false)).await.unwrap();

        let sent = w.carrier.sms_sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().any(|s| s.to == phone_for("staff-b")));
        // Rendered template, not raw placeholders.
        assert!(sent[0].body.contains("Mr Brown"));
        assert!(!sent[0].body.contains('{'));

        let occ = w
            .records
            .occurrence_snapshot(&OccurrenceId::from("occ-1"))
            .unwrap();
        assert_eq!(occ.status, OccurrenceStatus::Wave1Sent);
    }

    #[tokio::test]
    async fn stale_epoch_wave_sends_nothing() {
        let w = world().await;
        let epoch = w
            .controller
            .start_escalation(&OccurrenceId::from("occ-1"))
            .await
            .unwrap();
        let worker = SmsWaveWorker::new(w.controller.clone(), w.carrier.clone());

        worker.send_wave(wave_job(epoch - 1, 2, false)).await.unwrap();
        assert!(w.carrier.sms_sent().is_empty());
    }

    #[tokio::test]
    async fn assigned_occurrence_stops_waves() {
        let w = world().await;
        let epoch = w
            .controller
            .start_escalation(&OccurrenceId::from("occ-1"))
            .await
            .unwrap();
        w.controller
            .try_accept(
                &OccurrenceId::from("occ-1"),
                &StaffId::from("staff-a"),
                AcceptSource::Operator,
            )
            .await
            .unwrap();
        let worker = SmsWaveWorker::new(w.controller.clone(), w.carrier.clone());

        worker.send_wave(wave_job(epoch, 2, false)).await.unwrap();
        assert!(w.carrier.sms_sent().is_empty());
    }

    #[tokio::test]
    async fn accept_reply_assigns_and_acknowledges() {
        let w = world().await;
        let epoch = w
            .controller
            .start_escalation(&OccurrenceId::from("occ-1"))
            .await
            .unwrap();
        let worker = SmsWaveWorker::new(w.controller.clone(), w.carrier.clone());
        worker.send_wave(wave_job(epoch, 1, false)).await.unwrap();

        let inbound = InboundSmsHandler::new(w.controller.clone(), w.store.clone());
        let result = inbound
            .handle_reply(&phone_for("staff-b"), "YES")
            .await
            .unwrap();
        assert_eq!(result.disposition, SmsDisposition::Accepted);

        let occ = w
            .records
            .occurrence_snapshot(&OccurrenceId::from("occ-1"))
            .unwrap();
        assert_eq!(occ.assignee, Some(StaffId::from("staff-b")));

        // The loser hears it is taken.
        let result = inbound
            .handle_reply(&phone_for("staff-a"), "yes")
            .await
            .unwrap();
        assert_eq!(result.disposition, SmsDisposition::AlreadyAssigned);
    }

    #[tokio::test]
    async fn unknown_body_gets_throttled_help_reply() {
        let w = world().await;
        let epoch = w
            .controller
            .start_escalation(&OccurrenceId::from("occ-1"))
            .await
            .unwrap();
        let worker = SmsWaveWorker::new(w.controller.clone(), w.carrier.clone());
        worker.send_wave(wave_job(epoch, 1, false)).await.unwrap();

        let inbound = InboundSmsHandler::new(w.controller.clone(), w.store.clone());
        let first = inbound
            .handle_reply(&phone_for("staff-c"), "what is this?")
            .await
            .unwrap();
        assert_eq!(first.disposition, SmsDisposition::HelpSent);
        let second = inbound
            .handle_reply(&phone_for("staff-c"), "hello??")
            .await
            .unwrap();
        assert_eq!(second.disposition, SmsDisposition::Ignored);
        assert!(second.reply.is_none());
    }

    #[tokio::test]
    async fn confirmation_goes_to_the_winner_only() {
        let w = world().await;
        w.controller
            .start_escalation(&OccurrenceId::from("occ-1"))
            .await
            .unwrap();
        w.controller
            .try_accept(
                &OccurrenceId::from("occ-1"),
                &StaffId::from("staff-c"),
                AcceptSource::SmsReply,
            )
            .await
            .unwrap();

        // Drain the confirmation queue by hand.
        let claimed = w
            .queue
            .claim(crate::jobs::QUEUE_CONFIRMATION)
            .await
            .unwrap()
            .expect("confirmation job enqueued");
        let handler = ConfirmationSmsWorker::new(w.controller.clone(), w.carrier.clone());
        handler.handle(claimed).await.unwrap();

        let sent = w.carrier.sms_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, phone_for("staff-c"));
        assert!(sent[0].body.contains("confirmed"));
    }
}
