//! In-memory records store for tests and local development
//!
//! Implements the same conditional-update contract as the production
//! client: a write applies only when the caller's version token matches,
//! and every applied write bumps the version. Concurrent `try_accept`
//! races against this store behave exactly as they do against the real
//! records API.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::models::{
    CallLogEntry, CallLogPatch, OccurrencePatch, ProviderConfig, ShiftOccurrence, SmsLogEntry,
    StaffMember, UpdateOutcome, WaveCorrelation,
};
use super::RecordsApi;
use crate::types::{CallSid, OccurrenceId, OccurrenceStatus, ProviderId, StaffId};

#[derive(Default)]
struct Inner {
    occurrences: HashMap<OccurrenceId, ShiftOccurrence>,
    providers: HashMap<ProviderId, ProviderConfig>,
    staff: HashMap<StaffId, StaffMember>,
    call_log: Vec<CallLogEntry>,
    sms_log: Vec<SmsLogEntry>,
    releases: Vec<(OccurrenceId, StaffId, String)>,
    reschedules: Vec<(OccurrenceId, StaffId, DateTime<Utc>)>,
}

/// Records store backed by process memory.
#[derive(Default)]
pub struct InMemoryRecords {
    inner: Mutex<Inner>,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_occurrence(&self, occurrence: ShiftOccurrence) {
        self.inner
            .lock()
            .occurrences
            .insert(occurrence.occurrence_id.clone(), occurrence);
    }

    pub fn insert_provider(&self, config: ProviderConfig) {
        self.inner
            .lock()
            .providers
            .insert(config.provider_id.clone(), config);
    }

    pub fn insert_staff(&self, member: StaffMember) {
        self.inner
            .lock()
            .staff
            .insert(member.staff_id.clone(), member);
    }

    /// Current state of an occurrence (tests assert on this).
    pub fn occurrence_snapshot(&self, id: &OccurrenceId) -> Option<ShiftOccurrence> {
        self.inner.lock().occurrences.get(id).cloned()
    }

    pub fn call_log_snapshot(&self) -> Vec<CallLogEntry> {
        self.inner.lock().call_log.clone()
    }

    pub fn sms_log_snapshot(&self) -> Vec<SmsLogEntry> {
        self.inner.lock().sms_log.clone()
    }

    pub fn releases_snapshot(&self) -> Vec<(OccurrenceId, StaffId, String)> {
        self.inner.lock().releases.clone()
    }

    pub fn reschedules_snapshot(&self) -> Vec<(OccurrenceId, StaffId, DateTime<Utc>)> {
        self.inner.lock().reschedules.clone()
    }
}

#[async_trait]
impl RecordsApi for InMemoryRecords {
    async fn occurrence(&self, id: &OccurrenceId) -> anyhow::Result<Option<ShiftOccurrence>> {
        Ok(self.inner.lock().occurrences.get(id).cloned())
    }

    async fn update_occurrence(
        &self,
        id: &OccurrenceId,
        expected_version: i64,
        patch: OccurrencePatch,
    ) -> anyhow::Result<UpdateOutcome> {
        let mut inner = self.inner.lock();
        let Some(occurrence) = inner.occurrences.get_mut(id) else {
            anyhow::bail!("occurrence {id} not found");
        };
        if occurrence.version != expected_version {
            return Ok(UpdateOutcome::Conflict);
        }
        if let Some(status) = patch.status {
            occurrence.status = status;
        }
        if let Some(assignee) = patch.assignee {
            occurrence.assignee = assignee;
        }
        if let Some(epoch) = patch.escalation_epoch {
            occurrence.escalation_epoch = epoch;
        }
        occurrence.version += 1;
        Ok(UpdateOutcome::Applied(occurrence.clone()))
    }

    async fn provider_config(&self, id: &ProviderId) -> anyhow::Result<Option<ProviderConfig>> {
        Ok(self.inner.lock().providers.get(id).cloned())
    }

    async fn staff(&self, id: &StaffId) -> anyhow::Result<Option<StaffMember>> {
        Ok(self.inner.lock().staff.get(id).cloned())
    }

    async fn staff_by_phone(&self, phone: &str) -> anyhow::Result<Option<StaffMember>> {
        Ok(self
            .inner
            .lock()
            .staff
            .values()
            .find(|m| m.phone_e164 == phone)
            .cloned())
    }

    async fn staff_by_pin(&self, pin_hash: &str) -> anyhow::Result<Option<StaffMember>> {
        Ok(self
            .inner
            .lock()
            .staff
            .values()
            .find(|m| m.pin_hash == pin_hash)
            .cloned())
    }

    async fn occurrence_by_job_code(
        &self,
        provider: &ProviderId,
        job_code: &str,
    ) -> anyhow::Result<Option<ShiftOccurrence>> {
        Ok(self
            .inner
            .lock()
            .occurrences
            .values()
            .find(|o| &o.provider_id == provider && o.job_code == job_code)
            .cloned())
    }

    async fn assigned_occurrences_today(
        &self,
        staff: &StaffId,
        provider: &ProviderId,
    ) -> anyhow::Result<Vec<ShiftOccurrence>> {
        Ok(self
            .inner
            .lock()
            .occurrences
            .values()
            .filter(|o| {
                &o.provider_id == provider
                    && o.assignee.as_ref() == Some(staff)
                    && o.local_scheduled_at().date_naive()
                        == Utc::now()
                            .with_timezone(&o.local_scheduled_at().timezone())
                            .date_naive()
            })
            .cloned()
            .collect())
    }

    async fn release_assignment(
        &self,
        id: &OccurrenceId,
        staff: &StaffId,
        reason: &str,
    ) -> anyhow::Result<ShiftOccurrence> {
        let mut inner = self.inner.lock();
        inner
            .releases
            .push((id.clone(), staff.clone(), reason.to_string()));
        let Some(occurrence) = inner.occurrences.get_mut(id) else {
            anyhow::bail!("occurrence {id} not found");
        };
        occurrence.assignee = None;
        occurrence.status = OccurrenceStatus::Open;
        occurrence.version += 1;
        Ok(occurrence.clone())
    }

    async fn request_reschedule(
        &self,
        id: &OccurrenceId,
        staff: &StaffId,
        new_start: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.inner
            .lock()
            .reschedules
            .push((id.clone(), staff.clone(), new_start));
        Ok(())
    }

    async fn append_call_log(&self, entry: CallLogEntry) -> anyhow::Result<()> {
        self.inner.lock().call_log.push(entry);
        Ok(())
    }

    async fn update_call_log(
        &self,
        call_sid: &CallSid,
        patch: CallLogPatch,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner
            .call_log
            .iter_mut()
            .rev()
            .find(|e| &e.call_sid == call_sid)
        else {
            anyhow::bail!("call log entry {call_sid} not found");
        };
        if patch.outcome.is_some() {
            entry.outcome = patch.outcome;
        }
        if patch.ended_at.is_some() {
            entry.ended_at = patch.ended_at;
        }
        if patch.dtmf.is_some() {
            entry.dtmf = patch.dtmf;
        }
        if patch.recording_uri.is_some() {
            entry.recording_uri = patch.recording_uri;
        }
        if patch.transfer_recording_uri.is_some() {
            entry.transfer_recording_uri = patch.transfer_recording_uri;
        }
        Ok(())
    }

    async fn append_sms_log(&self, entry: SmsLogEntry) -> anyhow::Result<()> {
        self.inner.lock().sms_log.push(entry);
        Ok(())
    }

    async fn latest_open_wave_for_phone(
        &self,
        phone: &str,
    ) -> anyhow::Result<Option<WaveCorrelation>> {
        let inner = self.inner.lock();
        for entry in inner.sms_log.iter().rev() {
            if entry.phone != phone {
                continue;
            }
            let (Some(wave), Some(occurrence_id), Some(staff_id)) =
                (entry.wave, entry.occurrence_id.as_ref(), entry.staff_id.as_ref())
            else {
                continue;
            };
            let open = inner
                .occurrences
                .get(occurrence_id)
                .map(|o| !o.status.is_terminal())
                .unwrap_or(false);
            if open {
                return Ok(Some(WaveCorrelation {
                    occurrence_id: occurrence_id.clone(),
                    staff_id: staff_id.clone(),
                    wave,
                }));
            }
        }
        Ok(None)
    }
}
