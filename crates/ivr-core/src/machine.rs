//! The inbound call state machine
//!
//! Drives one caller through PIN auth, job-code selection, and the action
//! menu. The voice bridge calls [`IvrMachine::on_call_start`] when the
//! media stream opens, [`IvrMachine::on_digits`] / [`IvrMachine::on_timeout`]
//! as input arrives, and [`IvrMachine::on_hangup`] when the stream stops.
//! Each phase retries bad input a bounded number of times, then escapes to
//! a human transfer instead of looping the caller.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use covercall_escalation::controller::EscalationController;
use covercall_escalation::events::{EventKind, EventRecord};
use covercall_escalation::records::{CallLogEntry, CallLogPatch, ShiftOccurrence};
use covercall_escalation::types::{CallOutcome, CallPurpose, CallSid, ProviderId};

use crate::auth::pin_hash;
use crate::error::{IvrError, Result};
use crate::phases::IvrPhase;
use crate::prompts;
use crate::session::{CallSession, SessionRegistry};

/// How the bridge should collect the next input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitPolicy {
    pub max_digits: usize,
    /// Digit that ends collection early (job codes use '#').
    pub terminator: Option<char>,
    pub timeout_secs: u32,
}

impl DigitPolicy {
    pub fn digits(n: usize) -> Self {
        Self {
            max_digits: n,
            terminator: None,
            timeout_secs: 15,
        }
    }

    pub fn until_pound(max: usize) -> Self {
        Self {
            max_digits: max,
            terminator: Some('#'),
            timeout_secs: 20,
        }
    }
}

/// What the bridge does after speaking the step's prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Collect digits per the step's policy.
    Listen,
    /// Hand the call to the transfer coordinator.
    BeginTransfer,
    /// Speak, then end the call.
    Hangup,
}

/// One machine response: say these prompts, then act.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvrStep {
    pub prompts: Vec<String>,
    pub expect: Option<DigitPolicy>,
    pub action: StepAction,
}

impl IvrStep {
    pub fn listen(prompts: Vec<String>, expect: DigitPolicy) -> Self {
        Self {
            prompts,
            expect: Some(expect),
            action: StepAction::Listen,
        }
    }

    pub fn transfer(prompts: Vec<String>) -> Self {
        Self {
            prompts,
            expect: None,
            action: StepAction::BeginTransfer,
        }
    }

    pub fn hangup(prompts: Vec<String>) -> Self {
        Self {
            prompts,
            expect: None,
            action: StepAction::Hangup,
        }
    }
}

/// The IVR engine shared by all live calls.
pub struct IvrMachine {
    controller: Arc<EscalationController>,
    sessions: Arc<SessionRegistry>,
}

impl IvrMachine {
    pub fn new(controller: Arc<EscalationController>, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            controller,
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Media stream opened for a fresh inbound call.
    pub async fn on_call_start(&self, call_sid: &CallSid, from: &str) -> Result<IvrStep> {
        let session = CallSession::new(call_sid.clone(), from);
        self.sessions.insert(session);

        let entry = CallLogEntry::started(call_sid.clone(), CallPurpose::Ivr);
        if let Err(e) = self.controller.records().append_call_log(entry).await {
            warn!(call = %call_sid, error = %e, "ivr call log append failed");
        }

        info!(call = %call_sid, from = %from, "inbound ivr call started");
        Ok(IvrStep::listen(
            vec![prompts::WELCOME.to_string()],
            DigitPolicy::digits(4),
        ))
    }

    /// A complete digit group per the current phase's policy.
    pub async fn on_digits(&self, call_sid: &CallSid, digits: &str) -> Result<IvrStep> {
        let mut session = self
            .sessions
            .get(call_sid)
            .ok_or_else(|| IvrError::UnknownSession(call_sid.to_string()))?;

        debug!(call = %call_sid, phase = ?session.phase, "digits received");
        let step = match session.phase {
            IvrPhase::PinAuth => self.phase_pin(&mut session, digits).await?,
            IvrPhase::ProviderSelection => self.phase_provider(&mut session, digits).await?,
            IvrPhase::CollectJobCode => self.phase_job_code(&mut session, digits).await?,
            IvrPhase::ConfirmJobCode => self.phase_confirm_job(&mut session, digits).await?,
            IvrPhase::JobOptions => self.phase_job_options(&mut session, digits).await?,
            IvrPhase::CollectReason => {
                // Any key ends the spoken reason (captured on the recording).
                session.enter(IvrPhase::ConfirmLeaveOpen);
                IvrStep::listen(
                    vec![prompts::CONFIRM_LEAVE_OPEN.to_string()],
                    DigitPolicy::digits(1),
                )
            }
            IvrPhase::ConfirmLeaveOpen => self.phase_confirm_leave_open(&mut session, digits).await?,
            IvrPhase::CollectDay => self.phase_collect_day(&mut session, digits),
            IvrPhase::CollectMonth => self.phase_collect_month(&mut session, digits),
            IvrPhase::CollectTime => self.phase_collect_time(&mut session, digits).await?,
            IvrPhase::ConfirmDatetime => self.phase_confirm_datetime(&mut session, digits).await?,
            IvrPhase::Transfer | IvrPhase::Ended => {
                IvrStep::hangup(vec![prompts::GOODBYE.to_string()])
            }
        };

        self.sessions.insert(session);
        Ok(step)
    }

    /// Input window expired without digits.
    pub async fn on_timeout(&self, call_sid: &CallSid) -> Result<IvrStep> {
        let mut session = self
            .sessions
            .get(call_sid)
            .ok_or_else(|| IvrError::UnknownSession(call_sid.to_string()))?;
        let step = match session.phase {
            IvrPhase::Transfer | IvrPhase::Ended => {
                IvrStep::hangup(vec![prompts::GOODBYE.to_string()])
            }
            phase => {
                let (retry, main, policy) = Self::reprompt_for(phase);
                self.retry_or_escalate(&mut session, retry, main, policy)
            }
        };
        self.sessions.insert(session);
        Ok(step)
    }

    /// Media stream stopped.
    ///
    /// With a transfer pending the session stays alive for the dial leg;
    /// otherwise the call log is finalised and the session freed.
    pub async fn on_hangup(&self, call_sid: &CallSid) -> Result<()> {
        let Some(session) = self.sessions.get(call_sid) else {
            return Ok(());
        };
        if session.pending_transfer {
            debug!(call = %call_sid, "stream closed with transfer pending, session kept");
            return Ok(());
        }
        self.finish_session(call_sid).await
    }

    /// Finalise and free a session (the transfer path calls this when the
    /// dial leg completes).
    pub async fn finish_session(&self, call_sid: &CallSid) -> Result<()> {
        let Some(session) = self.sessions.remove(call_sid) else {
            return Ok(());
        };
        if let Err(e) = self
            .controller
            .records()
            .update_call_log(
                call_sid,
                CallLogPatch {
                    outcome: Some(CallOutcome::Completed),
                    ended_at: Some(Utc::now()),
                    ..CallLogPatch::default()
                },
            )
            .await
        {
            warn!(call = %call_sid, error = %e, "ivr call log update failed");
        }
        if let Some(provider) = session.provider_id.clone() {
            self.publish(&session, provider, EventKind::CallEnded, serde_json::Value::Null)
                .await;
        }
        info!(call = %call_sid, "ivr session finished");
        Ok(())
    }

    // === Phase handlers ===

    async fn phase_pin(&self, session: &mut CallSession, digits: &str) -> Result<IvrStep> {
        let staff = self
            .controller
            .records()
            .staff_by_pin(&pin_hash(digits.trim()))
            .await
            .map_err(IvrError::Records)?;

        let Some(staff) = staff else {
            if session.attempts + 1 >= session.phase.max_attempts() {
                warn!(call = %session.call_sid, "pin authentication exhausted");
                // Attribute the failure via the calling number when we can.
                if let Ok(Some(by_phone)) = self
                    .controller
                    .records()
                    .staff_by_phone(&session.from_phone)
                    .await
                {
                    if let Some(provider) = by_phone.provider_ids.first().cloned() {
                        self.publish(
                            session,
                            provider,
                            EventKind::AuthenticationFailed,
                            serde_json::json!({ "from": session.from_phone }),
                        )
                        .await;
                    }
                }
            }
            let (retry, main, policy) = Self::reprompt_for(IvrPhase::PinAuth);
            return Ok(self.retry_or_escalate(session, retry, main, policy));
        };

        session.staff_id = Some(staff.staff_id.clone());
        session.candidate_providers = staff.provider_ids.clone();

        let provider_for_events = staff
            .provider_ids
            .first()
            .cloned()
            .unwrap_or_else(|| ProviderId::from("unattributed"));
        self.publish(
            session,
            provider_for_events.clone(),
            EventKind::CallStarted,
            serde_json::json!({ "from": session.from_phone }),
        )
        .await;
        self.publish(
            session,
            provider_for_events,
            EventKind::CallAuthenticated,
            serde_json::json!({ "staff_id": staff.staff_id.as_str() }),
        )
        .await;
        info!(call = %session.call_sid, staff = %staff.staff_id, "caller authenticated");

        if session.candidate_providers.len() > 1 {
            let mut names = Vec::new();
            for provider_id in &session.candidate_providers {
                let name = self
                    .controller
                    .records()
                    .provider_config(provider_id)
                    .await
                    .map_err(IvrError::Records)?
                    .map(|p| p.display_name)
                    .unwrap_or_else(|| provider_id.to_string());
                names.push(name);
            }
            session.enter(IvrPhase::ProviderSelection);
            Ok(IvrStep::listen(
                vec![prompts::provider_menu(&names)],
                DigitPolicy::digits(1),
            ))
        } else {
            session.provider_id = session.candidate_providers.first().cloned();
            self.enter_job_code(session).await
        }
    }

    /// Move to job-code collection, telling the caller how many shifts of
    /// theirs are on today's roster.
    async fn enter_job_code(&self, session: &mut CallSession) -> Result<IvrStep> {
        let mut lines = Vec::new();
        if let (Some(staff), Some(provider)) = (&session.staff_id, &session.provider_id) {
            let today = self
                .controller
                .records()
                .assigned_occurrences_today(staff, provider)
                .await
                .map_err(IvrError::Records)?;
            if !today.is_empty() {
                lines.push(prompts::shifts_today(today.len()));
            }
        }
        lines.push(prompts::JOB_CODE.to_string());
        session.enter(IvrPhase::CollectJobCode);
        Ok(IvrStep::listen(lines, DigitPolicy::until_pound(8)))
    }

    async fn phase_provider(&self, session: &mut CallSession, digits: &str) -> Result<IvrStep> {
        let choice = digits.trim().parse::<usize>().ok();
        let selected = choice
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| session.candidate_providers.get(i).cloned());
        match selected {
            Some(provider_id) => {
                session.provider_id = Some(provider_id);
                self.enter_job_code(session).await
            }
            None => {
                let (retry, main, policy) = Self::reprompt_for(IvrPhase::ProviderSelection);
                Ok(self.retry_or_escalate(session, retry, main, policy))
            }
        }
    }

    async fn phase_job_code(&self, session: &mut CallSession, digits: &str) -> Result<IvrStep> {
        let code = digits.trim().trim_end_matches('#');
        let occurrence = match (&session.provider_id, &session.staff_id) {
            (Some(provider), Some(staff)) => {
                let found = self
                    .controller
                    .records()
                    .occurrence_by_job_code(provider, code)
                    .await
                    .map_err(IvrError::Records)?;
                found.filter(|o| o.assignee.as_ref() == Some(staff))
            }
            _ => None,
        };

        match occurrence {
            Some(occurrence) => {
                session.occurrence_id = Some(occurrence.occurrence_id.clone());
                session.enter(IvrPhase::ConfirmJobCode);
                let local = occurrence.local_scheduled_at();
                Ok(IvrStep::listen(
                    vec![prompts::confirm_job(
                        &occurrence.patient_name,
                        &local.format("%A %-d %B").to_string(),
                        &local.format("%-I:%M %p").to_string(),
                    )],
                    DigitPolicy::digits(1),
                ))
            }
            None => {
                let (retry, main, policy) = Self::reprompt_for(IvrPhase::CollectJobCode);
                Ok(self.retry_or_escalate(session, retry, main, policy))
            }
        }
    }

    async fn phase_confirm_job(&self, session: &mut CallSession, digits: &str) -> Result<IvrStep> {
        match digits.trim() {
            "1" => {
                session.enter(IvrPhase::JobOptions);
                Ok(IvrStep::listen(
                    vec![prompts::JOB_OPTIONS.to_string()],
                    DigitPolicy::digits(1),
                ))
            }
            "2" => {
                session.occurrence_id = None;
                session.enter(IvrPhase::CollectJobCode);
                Ok(IvrStep::listen(
                    vec![prompts::JOB_CODE.to_string()],
                    DigitPolicy::until_pound(8),
                ))
            }
            _ => {
                let (retry, main, policy) = Self::reprompt_for(IvrPhase::ConfirmJobCode);
                Ok(self.retry_or_escalate(session, retry, main, policy))
            }
        }
    }

    async fn phase_job_options(&self, session: &mut CallSession, digits: &str) -> Result<IvrStep> {
        let intent = match digits.trim() {
            "1" => "reschedule",
            "2" => "leave_open",
            "3" => "representative",
            "4" => "re_enter_code",
            _ => {
                let (retry, main, policy) = Self::reprompt_for(IvrPhase::JobOptions);
                return Ok(self.retry_or_escalate(session, retry, main, policy));
            }
        };
        if let Some(provider) = session.provider_id.clone() {
            self.publish(
                session,
                provider,
                EventKind::IntentDetected,
                serde_json::json!({ "intent": intent }),
            )
            .await;
        }

        Ok(match intent {
            "reschedule" => {
                session.enter(IvrPhase::CollectDay);
                IvrStep::listen(
                    vec![prompts::COLLECT_DAY.to_string()],
                    DigitPolicy::digits(2),
                )
            }
            "leave_open" => {
                session.enter(IvrPhase::CollectReason);
                IvrStep::listen(
                    vec![prompts::REASON.to_string()],
                    DigitPolicy {
                        max_digits: 1,
                        terminator: None,
                        timeout_secs: 30,
                    },
                )
            }
            "representative" => {
                session.enter(IvrPhase::Transfer);
                IvrStep::transfer(vec![prompts::TRANSFER.to_string()])
            }
            _ => {
                session.occurrence_id = None;
                session.enter(IvrPhase::CollectJobCode);
                IvrStep::listen(
                    vec![prompts::JOB_CODE.to_string()],
                    DigitPolicy::until_pound(8),
                )
            }
        })
    }

    async fn phase_confirm_leave_open(
        &self,
        session: &mut CallSession,
        digits: &str,
    ) -> Result<IvrStep> {
        match digits.trim() {
            "1" => {
                let (occurrence_id, staff_id) =
                    match (session.occurrence_id.clone(), session.staff_id.clone()) {
                        (Some(o), Some(s)) => (o, s),
                        _ => return Ok(IvrStep::hangup(vec![prompts::GOODBYE.to_string()])),
                    };
                // Opening the shift is the cancellation that feeds the
                // escalation engine.
                self.controller
                    .records()
                    .release_assignment(&occurrence_id, &staff_id, "ivr_leave_open")
                    .await
                    .map_err(IvrError::Records)?;
                self.controller.start_escalation(&occurrence_id).await?;
                info!(call = %session.call_sid, occurrence = %occurrence_id,
                      "shift opened via ivr");
                session.enter(IvrPhase::Ended);
                Ok(IvrStep::hangup(vec![prompts::LEAVE_OPEN_DONE.to_string()]))
            }
            "2" => {
                session.enter(IvrPhase::JobOptions);
                Ok(IvrStep::listen(
                    vec![prompts::JOB_OPTIONS.to_string()],
                    DigitPolicy::digits(1),
                ))
            }
            _ => {
                let (retry, main, policy) = Self::reprompt_for(IvrPhase::ConfirmLeaveOpen);
                Ok(self.retry_or_escalate(session, retry, main, policy))
            }
        }
    }

    fn phase_collect_day(&self, session: &mut CallSession, digits: &str) -> IvrStep {
        match crate::datetime::parse_two_digits(digits.trim())
            .filter(|d| crate::datetime::valid_day(*d))
        {
            Some(day) => {
                session.new_day = Some(day);
                session.enter(IvrPhase::CollectMonth);
                IvrStep::listen(
                    vec![prompts::COLLECT_MONTH.to_string()],
                    DigitPolicy::digits(2),
                )
            }
            None => {
                let (retry, main, policy) = Self::reprompt_for(IvrPhase::CollectDay);
                self.retry_or_escalate(session, retry, main, policy)
            }
        }
    }

    fn phase_collect_month(&self, session: &mut CallSession, digits: &str) -> IvrStep {
        match crate::datetime::parse_two_digits(digits.trim())
            .filter(|m| crate::datetime::valid_month(*m))
        {
            Some(month) => {
                session.new_month = Some(month);
                session.enter(IvrPhase::CollectTime);
                IvrStep::listen(
                    vec![prompts::COLLECT_TIME.to_string()],
                    DigitPolicy::digits(4),
                )
            }
            None => {
                let (retry, main, policy) = Self::reprompt_for(IvrPhase::CollectMonth);
                self.retry_or_escalate(session, retry, main, policy)
            }
        }
    }

    async fn phase_collect_time(&self, session: &mut CallSession, digits: &str) -> Result<IvrStep> {
        let parsed = crate::datetime::parse_time(digits.trim());
        let (day, month) = match (session.new_day, session.new_month) {
            (Some(d), Some(m)) => (d, m),
            _ => {
                session.enter(IvrPhase::CollectDay);
                return Ok(IvrStep::listen(
                    vec![prompts::COLLECT_DAY.to_string()],
                    DigitPolicy::digits(2),
                ));
            }
        };

        if let Some((hour, minute)) = parsed {
            let occurrence = self.selected_occurrence(session).await?;
            let now = Utc::now().with_timezone(&occurrence.local_scheduled_at().timezone());
            if crate::datetime::resolve_future_datetime(day, month, hour, minute, now).is_some() {
                session.new_hour = Some(hour);
                session.new_minute = Some(minute);
                session.enter(IvrPhase::ConfirmDatetime);
                return Ok(IvrStep::listen(
                    vec![prompts::confirm_datetime(day, month, hour, minute)],
                    DigitPolicy::digits(1),
                ));
            }
        }

        // Bad time or impossible calendar date: restart the date entry.
        session.new_day = None;
        session.new_month = None;
        session.attempts += 1;
        if session.attempts >= IvrPhase::CollectTime.max_attempts() {
            session.enter(IvrPhase::Transfer);
            return Ok(IvrStep::transfer(vec![prompts::ESCALATE.to_string()]));
        }
        session.phase = IvrPhase::CollectDay;
        Ok(IvrStep::listen(
            vec![
                prompts::DATE_RETRY.to_string(),
                prompts::COLLECT_DAY.to_string(),
            ],
            DigitPolicy::digits(2),
        ))
    }

    async fn phase_confirm_datetime(
        &self,
        session: &mut CallSession,
        digits: &str,
    ) -> Result<IvrStep> {
        match digits.trim() {
            "1" => {
                let (occurrence_id, staff_id) =
                    match (session.occurrence_id.clone(), session.staff_id.clone()) {
                        (Some(o), Some(s)) => (o, s),
                        _ => return Ok(IvrStep::hangup(vec![prompts::GOODBYE.to_string()])),
                    };
                let (day, month, hour, minute) = match (
                    session.new_day,
                    session.new_month,
                    session.new_hour,
                    session.new_minute,
                ) {
                    (Some(d), Some(m), Some(h), Some(min)) => (d, m, h, min),
                    _ => return Ok(IvrStep::hangup(vec![prompts::GOODBYE.to_string()])),
                };

                let occurrence = self.selected_occurrence(session).await?;
                let tz = occurrence.local_scheduled_at().timezone();
                let now = Utc::now().with_timezone(&tz);
                let Some(resolved) =
                    crate::datetime::resolve_future_datetime(day, month, hour, minute, now)
                else {
                    session.enter(IvrPhase::CollectDay);
                    return Ok(IvrStep::listen(
                        vec![
                            prompts::DATE_RETRY.to_string(),
                            prompts::COLLECT_DAY.to_string(),
                        ],
                        DigitPolicy::digits(2),
                    ));
                };

                self.controller
                    .records()
                    .request_reschedule(&occurrence_id, &staff_id, resolved.with_timezone(&Utc))
                    .await
                    .map_err(IvrError::Records)?;
                info!(call = %session.call_sid, occurrence = %occurrence_id,
                      new_start = %resolved, "reschedule requested via ivr");
                session.enter(IvrPhase::Ended);
                Ok(IvrStep::hangup(vec![prompts::RESCHEDULE_DONE.to_string()]))
            }
            "2" => {
                session.new_day = None;
                session.new_month = None;
                session.new_hour = None;
                session.new_minute = None;
                session.enter(IvrPhase::CollectDay);
                Ok(IvrStep::listen(
                    vec![prompts::COLLECT_DAY.to_string()],
                    DigitPolicy::digits(2),
                ))
            }
            _ => {
                let (retry, main, policy) = Self::reprompt_for(IvrPhase::ConfirmDatetime);
                Ok(self.retry_or_escalate(session, retry, main, policy))
            }
        }
    }

    // === Helpers ===

    /// Count a failed attempt; repeat the phase prompt or escape to a human.
    fn retry_or_escalate(
        &self,
        session: &mut CallSession,
        retry_prompt: &str,
        main_prompt: &str,
        policy: DigitPolicy,
    ) -> IvrStep {
        session.attempts += 1;
        if session.attempts >= session.phase.max_attempts() {
            session.enter(IvrPhase::Transfer);
            IvrStep::transfer(vec![prompts::ESCALATE.to_string()])
        } else {
            let mut lines = vec![retry_prompt.to_string()];
            if main_prompt != retry_prompt {
                lines.push(main_prompt.to_string());
            }
            IvrStep::listen(lines, policy)
        }
    }

    /// Retry wording and input policy per collecting phase.
    fn reprompt_for(phase: IvrPhase) -> (&'static str, &'static str, DigitPolicy) {
        match phase {
            IvrPhase::PinAuth => (prompts::PIN_RETRY, prompts::WELCOME, DigitPolicy::digits(4)),
            IvrPhase::ProviderSelection => (
                prompts::PROVIDER_RETRY,
                prompts::PROVIDER_RETRY,
                DigitPolicy::digits(1),
            ),
            IvrPhase::CollectJobCode => (
                prompts::JOB_CODE_RETRY,
                prompts::JOB_CODE,
                DigitPolicy::until_pound(8),
            ),
            IvrPhase::ConfirmJobCode | IvrPhase::JobOptions => (
                prompts::OPTIONS_RETRY,
                prompts::JOB_OPTIONS,
                DigitPolicy::digits(1),
            ),
            IvrPhase::CollectReason => (
                prompts::OPTIONS_RETRY,
                prompts::REASON,
                DigitPolicy::digits(1),
            ),
            IvrPhase::ConfirmLeaveOpen => (
                prompts::OPTIONS_RETRY,
                prompts::CONFIRM_LEAVE_OPEN,
                DigitPolicy::digits(1),
            ),
            IvrPhase::CollectDay => (
                prompts::DATE_RETRY,
                prompts::COLLECT_DAY,
                DigitPolicy::digits(2),
            ),
            IvrPhase::CollectMonth => (
                prompts::DATE_RETRY,
                prompts::COLLECT_MONTH,
                DigitPolicy::digits(2),
            ),
            IvrPhase::CollectTime => (
                prompts::DATE_RETRY,
                prompts::COLLECT_TIME,
                DigitPolicy::digits(4),
            ),
            IvrPhase::ConfirmDatetime | IvrPhase::Transfer | IvrPhase::Ended => (
                prompts::OPTIONS_RETRY,
                prompts::OPTIONS_RETRY,
                DigitPolicy::digits(1),
            ),
        }
    }

    async fn selected_occurrence(&self, session: &CallSession) -> Result<ShiftOccurrence> {
        let occurrence_id = session
            .occurrence_id
            .clone()
            .ok_or_else(|| IvrError::UnknownSession(session.call_sid.to_string()))?;
        self.controller
            .records()
            .occurrence(&occurrence_id)
            .await
            .map_err(IvrError::Records)?
            .ok_or_else(|| IvrError::UnknownSession(session.call_sid.to_string()))
    }

    async fn publish(
        &self,
        session: &CallSession,
        provider: ProviderId,
        kind: EventKind,
        detail: serde_json::Value,
    ) {
        let mut record = EventRecord::new(provider, kind)
            .call(session.call_sid.clone())
            .detail(detail);
        if let Some(occurrence) = session.occurrence_id.clone() {
            record = record.occurrence(occurrence);
        }
        self.controller.events().publish(record).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covercall_escalation::config::EngineConfig;
    use covercall_escalation::events::EventPublisher;
    use covercall_escalation::live::LiveCallRegistry;
    use covercall_escalation::records::InMemoryRecords;
    use covercall_escalation::testutil::{
        occurrence_fixture, pin_for, provider_fixture, staff_fixture,
    };
    use covercall_escalation::types::{OccurrenceId, OccurrenceStatus, StaffId};
    use covercall_queue::JobQueue;

    struct World {
        machine: IvrMachine,
        records: Arc<InMemoryRecords>,
    }

    async fn world() -> World {
        let records = Arc::new(InMemoryRecords::new());
        records.insert_provider(provider_fixture("prov-1"));
        records.insert_staff(staff_fixture("staff-a"));
        records.insert_staff(staff_fixture("staff-b"));
        let mut occurrence = occurrence_fixture(
            "occ-1",
            "prov-1",
            &["staff-a", "staff-b"],
            Utc::now() + chrono::Duration::hours(6),
        );
        occurrence.status = OccurrenceStatus::Assigned;
        occurrence.assignee = Some(StaffId::from("staff-a"));
        records.insert_occurrence(occurrence);

        let queue = Arc::new(JobQueue::in_memory().await.unwrap());
        let events = Arc::new(EventPublisher::new(queue.pool().clone()).await.unwrap());
        let controller = Arc::new(EscalationController::new(
            records.clone(),
            queue,
            events,
            Arc::new(LiveCallRegistry::new()),
            EngineConfig::default(),
        ));
        let machine = IvrMachine::new(controller, Arc::new(SessionRegistry::new()));
        World { machine, records }
    }

    fn sid() -> CallSid {
        CallSid::from("CA-ivr-1")
    }

    async fn authenticate(w: &World) {
        w.machine
            .on_call_start(&sid(), "+61400000001")
            .await
            .unwrap();
        let step = w
            .machine
            .on_digits(&sid(), &pin_for("staff-a"))
            .await
            .unwrap();
        assert_eq!(step.action, StepAction::Listen);
        // The roster summary may precede the job-code prompt.
        assert!(step.prompts.last().unwrap().contains("job code"));
    }

    async fn select_job(w: &World) {
        let code = w
            .records
            .occurrence_snapshot(&OccurrenceId::from("occ-1"))
            .unwrap()
            .job_code;
        let step = w
            .machine
            .on_digits(&sid(), &format!("{code}#"))
            .await
            .unwrap();
        assert!(step.prompts[0].contains("Press 1 to confirm"));
        let step = w.machine.on_digits(&sid(), "1").await.unwrap();
        assert!(step.prompts[0].contains("Press 1 to reschedule"));
    }

    #[tokio::test]
    async fn pin_auth_resolves_staff_and_provider() {
        let w = world().await;
        authenticate(&w).await;
        let session = w.machine.sessions().get(&sid()).unwrap();
        assert_eq!(session.staff_id, Some(StaffId::from("staff-a")));
        assert_eq!(session.phase, IvrPhase::CollectJobCode);
        assert!(session.provider_id.is_some());
    }

    #[tokio::test]
    async fn bad_pin_retries_then_escalates_to_human() {
        let w = world().await;
        w.machine
            .on_call_start(&sid(), "+61400000001")
            .await
            .unwrap();

        let step = w.machine.on_digits(&sid(), "9999").await.unwrap();
        assert_eq!(step.action, StepAction::Listen);
        let step = w.machine.on_digits(&sid(), "8888").await.unwrap();
        assert_eq!(step.action, StepAction::Listen);
        // Third failure escapes to a human.
        let step = w.machine.on_digits(&sid(), "7777").await.unwrap();
        assert_eq!(step.action, StepAction::BeginTransfer);
        assert_eq!(
            w.machine.sessions().get(&sid()).unwrap().phase,
            IvrPhase::Transfer
        );
    }

    #[tokio::test]
    async fn wrong_job_code_reprompts() {
        let w = world().await;
        authenticate(&w).await;
        let step = w.machine.on_digits(&sid(), "0000#").await.unwrap();
        assert!(step.prompts[0].contains("couldn't find"));
        assert_eq!(
            w.machine.sessions().get(&sid()).unwrap().phase,
            IvrPhase::CollectJobCode
        );
    }

    #[tokio::test]
    async fn leave_open_releases_and_starts_escalation() {
        let w = world().await;
        authenticate(&w).await;
        select_job(&w).await;

        // 2 = leave open, any key after the reason, 1 = confirm.
        let step = w.machine.on_digits(&sid(), "2").await.unwrap();
        assert!(step.prompts[0].contains("After the tone"));
        let step = w.machine.on_digits(&sid(), "5").await.unwrap();
        assert!(step.prompts[0].contains("Press 1 to confirm"));
        let step = w.machine.on_digits(&sid(), "1").await.unwrap();
        assert_eq!(step.action, StepAction::Hangup);

        let occurrence = w
            .records
            .occurrence_snapshot(&OccurrenceId::from("occ-1"))
            .unwrap();
        assert_eq!(occurrence.status, OccurrenceStatus::Open);
        assert_eq!(occurrence.assignee, None);
        assert_eq!(occurrence.escalation_epoch, 1, "escalation restarted");
        assert_eq!(w.records.releases_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn reschedule_collects_validated_datetime() {
        let w = world().await;
        authenticate(&w).await;
        select_job(&w).await;

        let step = w.machine.on_digits(&sid(), "1").await.unwrap();
        assert!(step.prompts[0].contains("day of the month"));
        let step = w.machine.on_digits(&sid(), "15").await.unwrap();
        assert!(step.prompts[0].contains("month"));
        // Month 13 is rejected.
        let step = w.machine.on_digits(&sid(), "13").await.unwrap();
        assert!(step.prompts[0].contains("isn't valid"));
        let step = w.machine.on_digits(&sid(), "06").await.unwrap();
        assert!(step.prompts[0].contains("start time"));
        let step = w.machine.on_digits(&sid(), "0930").await.unwrap();
        assert!(step.prompts[0].contains("Press 1 to confirm"));
        let step = w.machine.on_digits(&sid(), "1").await.unwrap();
        assert_eq!(step.action, StepAction::Hangup);

        let reschedules = w.records.reschedules_snapshot();
        assert_eq!(reschedules.len(), 1);
        assert_eq!(reschedules[0].0, OccurrenceId::from("occ-1"));
    }

    #[tokio::test]
    async fn representative_option_begins_transfer() {
        let w = world().await;
        authenticate(&w).await;
        select_job(&w).await;
        let step = w.machine.on_digits(&sid(), "3").await.unwrap();
        assert_eq!(step.action, StepAction::BeginTransfer);
    }

    #[tokio::test]
    async fn invalid_calendar_date_restarts_date_entry() {
        let w = world().await;
        authenticate(&w).await;
        select_job(&w).await;

        w.machine.on_digits(&sid(), "1").await.unwrap();
        w.machine.on_digits(&sid(), "31").await.unwrap();
        w.machine.on_digits(&sid(), "02").await.unwrap();
        // 31 February cannot resolve; the machine restarts at the day.
        let step = w.machine.on_digits(&sid(), "0900").await.unwrap();
        assert!(step.prompts[0].contains("isn't valid"));
        assert_eq!(
            w.machine.sessions().get(&sid()).unwrap().phase,
            IvrPhase::CollectDay
        );
    }

    #[tokio::test]
    async fn hangup_finalises_session() {
        let w = world().await;
        authenticate(&w).await;
        w.machine.on_hangup(&sid()).await.unwrap();
        assert!(w.machine.sessions().get(&sid()).is_none());
    }
}
