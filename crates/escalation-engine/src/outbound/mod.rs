//! # Outbound Call Orchestrator
//!
//! Round-robin over `pool × rounds`. Offers are strictly serialised per
//! occurrence: the next offer job is enqueued only from the terminal
//! callback of the previous one, and deterministic job ids make the
//! decline-vs-status callback race enqueue it exactly once. Every job
//! carries its escalation epoch and is dropped at dispatch when stale.

mod state;

pub use state::{OfferCallState, OfferEvent, TerminationReason};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use covercall_queue::{ClaimedJob, JobHandler, JobOptions, JobPriority};
use tracing::{debug, info, warn};

use crate::carrier::twiml::{Gather, Twiml};
use crate::carrier::{CarrierCallStatus, OutboundCallRequest, VoiceCarrier};
use crate::controller::EscalationController;
use crate::error::{EscalationError, Result};
use crate::events::{EventKind, EventRecord};
use crate::jobs::{offer_job_id, OutboundJob, QUEUE_OUTBOUND};
use crate::phone::PhoneValidator;
use crate::records::{CallLogEntry, CallLogPatch, ShiftOccurrence};
use crate::store::EngineStore;
use crate::template::{self, TemplateVars};
use crate::tts::{prompt_cache_key, CallAudioStore, PromptCache, SpeechSynthesizer};
use crate::types::{
    AcceptOutcome, AcceptSource, CallOutcome, CallPurpose, CallSid, OccurrenceId,
    OccurrenceStatus,
};

const PROMPT_SUFFIX: &str = " Press 1 to accept this shift. Press 2 to decline.";
const RETRY_PREFIX: &str = "Sorry, I didn't catch that.";

const SAY_ACCEPTED: &str =
    "You've accepted the shift. A confirmation message is on its way. Goodbye.";
const SAY_TAKEN: &str = "Sorry, this shift has just been taken. Goodbye.";
const SAY_DECLINED: &str = "No problem. Thank you, goodbye.";
const SAY_CLOSED: &str = "This shift is no longer available. Goodbye.";

/// Orchestrates offer calls and their webhook callbacks.
pub struct OutboundOrchestrator {
    controller: Arc<EscalationController>,
    carrier: Arc<dyn VoiceCarrier>,
    tts: Arc<dyn SpeechSynthesizer>,
    prompts: Arc<PromptCache>,
    call_audio: Arc<CallAudioStore>,
    store: EngineStore,
    validator: PhoneValidator,
}

impl OutboundOrchestrator {
    pub fn new(
        controller: Arc<EscalationController>,
        carrier: Arc<dyn VoiceCarrier>,
        tts: Arc<dyn SpeechSynthesizer>,
        prompts: Arc<PromptCache>,
        call_audio: Arc<CallAudioStore>,
        store: EngineStore,
    ) -> Self {
        let validator =
            PhoneValidator::new(controller.config().allowed_country_prefixes.clone());
        Self {
            controller,
            carrier,
            tts,
            prompts,
            call_audio,
            store,
            validator,
        }
    }

    pub fn store(&self) -> &EngineStore {
        &self.store
    }

    async fn handle_cascade_start(&self, occurrence_id: OccurrenceId, epoch: i64) -> anyhow::Result<()> {
        let records = self.controller.records();
        let Some(occurrence) = records.occurrence(&occurrence_id).await? else {
            return Ok(());
        };
        if occurrence.escalation_epoch != epoch || occurrence.status.is_terminal() {
            debug!(occurrence = %occurrence_id, "stale cascade start dropped");
            return Ok(());
        }
        if !self.controller.mark_calling(&occurrence_id, epoch).await? {
            return Ok(());
        }
        info!(occurrence = %occurrence_id, "outbound cascade started");
        self.enqueue_offer(&occurrence_id, epoch, 1, 0).await?;
        Ok(())
    }

    async fn handle_offer(
        &self,
        occurrence_id: OccurrenceId,
        epoch: i64,
        round: u32,
        staff_idx: u32,
    ) -> anyhow::Result<()> {
        let records = self.controller.records();
        let Some(occurrence) = records.occurrence(&occurrence_id).await? else {
            return Ok(());
        };
        if occurrence.escalation_epoch != epoch {
            debug!(occurrence = %occurrence_id, round, staff_idx, "stale offer dropped");
            return Ok(());
        }
        if occurrence.status == OccurrenceStatus::Assigned {
            self.controller
                .events()
                .publish(
                    EventRecord::new(
                        occurrence.provider_id.clone(),
                        EventKind::OutboundCascadeCancelled,
                    )
                    .occurrence(occurrence_id.clone())
                    .detail(serde_json::json!({ "round": round })),
                )
                .await;
            return Ok(());
        }
        if occurrence.status.is_terminal() {
            return Ok(());
        }
        let Some(provider) = records.provider_config(&occurrence.provider_id).await? else {
            warn!(provider = %occurrence.provider_id, "provider config missing mid-cascade");
            return Ok(());
        };

        // End of the pool: wrap to the next round or exhaust.
        if staff_idx as usize >= occurrence.pool.len() {
            if round >= provider.max_rounds {
                if self.controller.mark_unfilled(&occurrence_id, epoch).await? {
                    info!(occurrence = %occurrence_id, rounds = round, "all rounds exhausted");
                    self.controller
                        .events()
                        .publish(
                            EventRecord::new(
                                occurrence.provider_id.clone(),
                                EventKind::OutboundAllRoundsExhausted,
                            )
                            .occurrence(occurrence_id.clone())
                            .detail(serde_json::json!({ "rounds": round })),
                        )
                        .await;
                }
            } else {
                self.enqueue_offer(&occurrence_id, epoch, round + 1, 0).await?;
            }
            return Ok(());
        }

        let staff_id = occurrence.pool[staff_idx as usize].clone();
        let Some(staff) = records.staff(&staff_id).await? else {
            warn!(staff = %staff_id, "pool member not found, skipped");
            self.enqueue_offer(&occurrence_id, epoch, round, staff_idx + 1).await?;
            return Ok(());
        };
        if !self.validator.is_valid(&staff.phone_e164) {
            debug!(staff = %staff_id, "invalid number, skipped");
            self.enqueue_offer(&occurrence_id, epoch, round, staff_idx + 1).await?;
            return Ok(());
        }

        // Personalised prompt, cached by (template, variables, voice).
        let config = self.controller.config();
        let vars = TemplateVars::for_offer(&occurrence, &staff);
        let text = format!(
            "{}{}",
            template::render(&provider.message_template, &vars),
            PROMPT_SUFFIX
        );
        let audio = self
            .prompts
            .get_or_synthesize(
                self.tts.as_ref(),
                prompt_cache_key("outbound-offer", &vars.digest(), &config.voice),
                &text,
                &config.voice,
            )
            .await
            .map_err(EscalationError::Tts)?;

        let query = offer_query(&occurrence, &staff_id.to_string(), round, staff_idx, epoch);
        let request = OutboundCallRequest {
            to: staff.phone_e164.clone(),
            from: provider.voice_sender.clone(),
            answer_url: config.answer_url(&query),
            status_url: config.status_url(&query),
            ring_timeout_secs: config.ring_timeout.as_secs() as u32,
        };
        let call_sid = self
            .carrier
            .originate(request)
            .await
            .map_err(EscalationError::Carrier)?;

        self.call_audio.stage(call_sid.as_str(), Bytes::from(audio));
        self.store
            .insert_offer(&call_sid, &occurrence_id, &staff_id, epoch, round, staff_idx)
            .await?;

        let mut entry = CallLogEntry::started(call_sid.clone(), CallPurpose::OutboundOffer);
        entry.occurrence_id = Some(occurrence_id.clone());
        entry.staff_id = Some(staff_id.clone());
        entry.round = Some(round);
        records.append_call_log(entry).await?;

        info!(occurrence = %occurrence_id, staff = %staff_id, round, staff_idx,
              call = %call_sid, "offer call placed");
        Ok(())
    }

    /// Answer webhook: the offered party picked up.
    pub async fn on_answer(&self, call_sid: &CallSid) -> Result<String> {
        let Some(offer) = self.store.offer(call_sid).await? else {
            return Ok(Twiml::sorry_and_hangup());
        };
        let occurrence_id = offer.occurrence_id();
        let occurrence = self.load_occurrence(&occurrence_id).await?;

        // The shift may have been taken between dial and answer.
        if occurrence.escalation_epoch != offer.epoch || !occurrence.status.is_acceptable() {
            self.store.resolve_offer(call_sid, "taken").await?;
            self.finish_call_log(call_sid, CallOutcome::Completed, None).await;
            self.call_audio.remove(call_sid.as_str());
            return Ok(Twiml::new().say(SAY_TAKEN).hangup().to_xml());
        }

        self.store
            .set_offer_state(call_sid, OfferCallState::InOffer.label())
            .await?;
        Ok(self.gather_xml(call_sid, &offer_query_from_row(&offer), false))
    }

    /// Response webhook: DTMF digits (or a gather timeout) for an offer.
    pub async fn on_response(&self, call_sid: &CallSid, digits: Option<&str>) -> Result<String> {
        let Some(offer) = self.store.offer(call_sid).await? else {
            return Ok(Twiml::sorry_and_hangup());
        };
        let occurrence_id = offer.occurrence_id();
        let staff_id = offer.staff_id();

        let digit = digits.and_then(|d| d.trim().chars().next());
        match digit {
            Some('1') => {
                let outcome = self
                    .controller
                    .try_accept(&occurrence_id, &staff_id, AcceptSource::OutboundDtmf)
                    .await?;
                match outcome {
                    AcceptOutcome::Accepted => {
                        self.store
                            .resolve_offer(call_sid, OfferCallState::Accepted.label())
                            .await?;
                        self.finish_call_log(call_sid, CallOutcome::Accepted, Some("1")).await;
                        self.call_audio.remove(call_sid.as_str());
                        Ok(Twiml::new().say(SAY_ACCEPTED).hangup().to_xml())
                    }
                    AcceptOutcome::AlreadyAssigned(_) => {
                        self.store.resolve_offer(call_sid, "taken").await?;
                        self.finish_call_log(call_sid, CallOutcome::Completed, Some("1")).await;
                        self.call_audio.remove(call_sid.as_str());
                        Ok(Twiml::new().say(SAY_TAKEN).hangup().to_xml())
                    }
                    AcceptOutcome::Ineligible | AcceptOutcome::Closed => {
                        self.store.resolve_offer(call_sid, "taken").await?;
                        self.finish_call_log(call_sid, CallOutcome::Completed, Some("1")).await;
                        self.call_audio.remove(call_sid.as_str());
                        Ok(Twiml::new().say(SAY_CLOSED).hangup().to_xml())
                    }
                }
            }
            Some('2') => {
                if self
                    .store
                    .resolve_offer(call_sid, OfferCallState::Terminated(TerminationReason::Declined).label())
                    .await?
                {
                    self.finish_call_log(call_sid, CallOutcome::Declined, Some("2")).await;
                    self.call_audio.remove(call_sid.as_str());
                    self.enqueue_offer(
                        &occurrence_id,
                        offer.epoch,
                        offer.round as u32,
                        offer.staff_idx as u32 + 1,
                    )
                    .await?;
                }
                Ok(Twiml::new().say(SAY_DECLINED).hangup().to_xml())
            }
            Some(other) => {
                // One re-prompt, then the attempt counts as no-answer.
                if self.store.spend_reprompt(call_sid).await? {
                    debug!(call = %call_sid, digit = %other, "invalid digit, re-prompting");
                    Ok(self.gather_xml(call_sid, &offer_query_from_row(&offer), true))
                } else {
                    self.terminate_as_no_answer(&offer, call_sid, Some(other)).await
                }
            }
            None => self.terminate_as_no_answer(&offer, call_sid, None).await,
        }
    }

    /// Status webhook: ring results and hang-ups.
    pub async fn on_status(&self, call_sid: &CallSid, status: CarrierCallStatus) -> Result<()> {
        let Some(offer) = self.store.offer(call_sid).await? else {
            return Ok(());
        };
        let event = match status {
            CarrierCallStatus::Answered | CarrierCallStatus::InProgress => {
                if !offer.resolved && offer.state == "dialing" {
                    self.store
                        .set_offer_state(call_sid, OfferCallState::InOffer.label())
                        .await?;
                }
                return Ok(());
            }
            CarrierCallStatus::Queued | CarrierCallStatus::Ringing => return Ok(()),
            CarrierCallStatus::NoAnswer => OfferEvent::NoAnswer,
            CarrierCallStatus::Busy => OfferEvent::Busy,
            CarrierCallStatus::Failed | CarrierCallStatus::Canceled => OfferEvent::DialFailed,
            // A completed call that never resolved hung up mid-gather.
            CarrierCallStatus::Completed => OfferEvent::Timeout,
        };

        let next = OfferCallState::from_label(&offer.state).on_event(event);
        let OfferCallState::Terminated(reason) = next else {
            return Ok(());
        };
        if self.store.resolve_offer(call_sid, next.label()).await? {
            self.finish_call_log(call_sid, reason.outcome(), None).await;
            self.call_audio.remove(call_sid.as_str());
            self.enqueue_offer(
                &offer.occurrence_id(),
                offer.epoch,
                offer.round as u32,
                offer.staff_idx as u32 + 1,
            )
            .await?;
        }
        Ok(())
    }

    async fn terminate_as_no_answer(
        &self,
        offer: &crate::store::OfferRow,
        call_sid: &CallSid,
        dtmf: Option<char>,
    ) -> Result<String> {
        if self
            .store
            .resolve_offer(
                call_sid,
                OfferCallState::Terminated(TerminationReason::NoAnswer).label(),
            )
            .await?
        {
            let dtmf = dtmf.map(|c| c.to_string());
            self.finish_call_log(call_sid, CallOutcome::NoAnswer, dtmf.as_deref()).await;
            self.call_audio.remove(call_sid.as_str());
            self.enqueue_offer(
                &offer.occurrence_id(),
                offer.epoch,
                offer.round as u32,
                offer.staff_idx as u32 + 1,
            )
            .await?;
        }
        Ok(Twiml::new().say(SAY_DECLINED).hangup().to_xml())
    }

    fn gather_xml(&self, call_sid: &CallSid, query: &str, retry: bool) -> String {
        let config = self.controller.config();
        let action = format!(
            "{}&callId={}",
            config.response_url(query),
            call_sid
        );
        let mut inner = Twiml::new();
        if retry {
            inner = inner.say(RETRY_PREFIX);
        }
        inner = inner.play(config.audio_url(call_sid.as_str()));
        Twiml::new()
            .gather(Gather {
                num_digits: 1,
                timeout_secs: config.dtmf_timeout.as_secs() as u32,
                action_url: action,
                inner,
            })
            // Gather fell through without input: report the timeout.
            .redirect(format!("{}&callId={}&Digits=", config.response_url(query), call_sid))
            .to_xml()
    }

    async fn enqueue_offer(
        &self,
        occurrence_id: &OccurrenceId,
        epoch: i64,
        round: u32,
        staff_idx: u32,
    ) -> Result<()> {
        self.controller
            .queue()
            .enqueue(
                QUEUE_OUTBOUND,
                &OutboundJob::Offer {
                    occurrence_id: occurrence_id.clone(),
                    epoch,
                    round,
                    staff_idx,
                },
                Utc::now(),
                JobOptions {
                    job_id: Some(offer_job_id(occurrence_id, epoch, round, staff_idx)),
                    subject: Some(occurrence_id.to_string()),
                    priority: JobPriority::High,
                    max_attempts: None,
                },
            )
            .await?;
        Ok(())
    }

    async fn finish_call_log(&self, call_sid: &CallSid, outcome: CallOutcome, dtmf: Option<&str>) {
        let patch = CallLogPatch {
            outcome: Some(outcome),
            ended_at: Some(Utc::now()),
            dtmf: dtmf.map(|d| d.to_string()),
            ..CallLogPatch::default()
        };
        if let Err(e) = self
            .controller
            .records()
            .update_call_log(call_sid, patch)
            .await
        {
            warn!(call = %call_sid, error = %e, "call log update failed");
        }
    }

    async fn load_occurrence(&self, id: &OccurrenceId) -> Result<ShiftOccurrence> {
        self.controller
            .records()
            .occurrence(id)
            .await
            .map_err(EscalationError::Records)?
            .ok_or_else(|| EscalationError::UnknownOccurrence(id.clone()))
    }
}

#[async_trait]
impl JobHandler for OutboundOrchestrator {
    async fn handle(&self, job: ClaimedJob) -> anyhow::Result<()> {
        match job.deserialize::<OutboundJob>()? {
            OutboundJob::CascadeStart {
                occurrence_id,
                epoch,
            } => self.handle_cascade_start(occurrence_id, epoch).await,
            OutboundJob::Offer {
                occurrence_id,
                epoch,
                round,
                staff_idx,
            } => self.handle_offer(occurrence_id, epoch, round, staff_idx).await,
        }
    }
}

fn offer_query(
    occurrence: &ShiftOccurrence,
    staff_id: &str,
    round: u32,
    staff_idx: u32,
    epoch: i64,
) -> String {
    format!(
        "occurrenceId={}&employeeId={}&round={}&staffIdx={}&epoch={}",
        occurrence.occurrence_id, staff_id, round, staff_idx, epoch
    )
}

fn offer_query_from_row(offer: &crate::store::OfferRow) -> String {
    format!(
        "occurrenceId={}&employeeId={}&round={}&staffIdx={}&epoch={}",
        offer.occurrence_id, offer.staff_id, offer.round, offer.staff_idx, offer.epoch
    )
}
