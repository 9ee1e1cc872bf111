//! Typed rows of the external records store

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CallOutcome, CallPurpose, CallSid, OccurrenceId, OccurrenceStatus, ProviderId, StaffId,
};

/// One instance of a shift to be filled. The records store owns this row;
/// the engine only ever mutates it through the conditional update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftOccurrence {
    pub occurrence_id: OccurrenceId,
    pub provider_id: ProviderId,
    /// Opaque reference to the patient record; never rendered to staff.
    pub patient_ref: String,
    /// Display name substituted into message templates.
    pub patient_name: String,
    pub suburb: String,
    /// Shift start in UTC; rendered to staff in the provider's zone.
    pub scheduled_at: DateTime<Utc>,
    /// IANA zone name of the provider's region.
    pub time_zone: String,
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    /// Short numeric code staff key in through the IVR.
    pub job_code: String,
    /// Ordered candidate list; round-robin order is significant.
    pub pool: Vec<StaffId>,
    pub status: OccurrenceStatus,
    /// Set only by the single atomic assignment transition.
    pub assignee: Option<StaffId>,
    /// Incremented on every (re)start of escalation and on assignment.
    /// Jobs stamped with an older epoch are dropped at dispatch.
    pub escalation_epoch: i64,
    /// Optimistic-concurrency token for the conditional update.
    pub version: i64,
}

impl ShiftOccurrence {
    /// The provider-local wall-clock moment of the shift.
    pub fn local_scheduled_at(&self) -> DateTime<chrono_tz::Tz> {
        let tz: chrono_tz::Tz = self
            .time_zone
            .parse()
            .unwrap_or(chrono_tz::Australia::Sydney);
        self.scheduled_at.with_timezone(&tz)
    }
}

/// Fields a conditional occurrence update may change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OccurrencePatch {
    pub status: Option<OccurrenceStatus>,
    /// `Some(Some(id))` assigns, `Some(None)` clears.
    pub assignee: Option<Option<StaffId>>,
    pub escalation_epoch: Option<i64>,
}

/// Result of a conditional update against the version token.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The write was applied; the fresh row (with its new version) is
    /// returned.
    Applied(ShiftOccurrence),
    /// Another writer got there first; re-read and decide again.
    Conflict,
}

/// Provider-level escalation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_id: ProviderId,
    /// Name spoken to staff in the IVR provider menu.
    pub display_name: String,
    pub outbound_enabled: bool,
    /// Delay between the final SMS wave and the call cascade, minutes
    /// (1..=120).
    pub wait_minutes: u32,
    /// Full passes of the pool during the cascade (1..=5).
    pub max_rounds: u32,
    /// SMS/offer template with the closed placeholder set.
    pub message_template: String,
    /// Clamp bounds for the derived wave interval, minutes.
    pub wave_interval_min: u32,
    pub wave_interval_max: u32,
    /// Number SMS messages are sent from.
    pub sms_sender: String,
    /// Caller id for outbound offer calls.
    pub voice_sender: String,
    /// Human representative reached by "talk to a representative".
    pub representative_phone: String,
}

impl ProviderConfig {
    /// Validate the invariants the records UI is supposed to enforce.
    /// `start_escalation` refuses misconfigured providers outright.
    pub fn validation_error(&self) -> Option<String> {
        if self.message_template.trim().is_empty() {
            return Some("message template is empty".into());
        }
        if self.sms_sender.trim().is_empty() || self.voice_sender.trim().is_empty() {
            return Some("sender phone numbers are not configured".into());
        }
        if !(1..=120).contains(&self.wait_minutes) {
            return Some(format!("wait_minutes {} out of range", self.wait_minutes));
        }
        if !(1..=5).contains(&self.max_rounds) {
            return Some(format!("max_rounds {} out of range", self.max_rounds));
        }
        None
    }
}

/// A staff member able to cover shifts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffMember {
    pub staff_id: StaffId,
    pub display_name: String,
    pub phone_e164: String,
    pub languages: Vec<String>,
    /// Hex sha-256 of the IVR PIN.
    pub pin_hash: String,
    /// Providers whose pools this member belongs to.
    pub provider_ids: Vec<ProviderId>,
}

/// Append-only call log row: one per outbound attempt or inbound session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLogEntry {
    pub call_sid: CallSid,
    pub occurrence_id: Option<OccurrenceId>,
    pub staff_id: Option<StaffId>,
    pub purpose: CallPurpose,
    pub round: Option<u32>,
    pub outcome: Option<CallOutcome>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub dtmf: Option<String>,
    pub recording_uri: Option<String>,
    pub transfer_recording_uri: Option<String>,
}

impl CallLogEntry {
    pub fn started(call_sid: CallSid, purpose: CallPurpose) -> Self {
        Self {
            call_sid,
            occurrence_id: None,
            staff_id: None,
            purpose,
            round: None,
            outcome: None,
            started_at: Utc::now(),
            ended_at: None,
            dtmf: None,
            recording_uri: None,
            transfer_recording_uri: None,
        }
    }
}

/// Mutable completion fields of a call-log row.
#[derive(Debug, Clone, Default)]
pub struct CallLogPatch {
    pub outcome: Option<CallOutcome>,
    pub ended_at: Option<DateTime<Utc>>,
    pub dtmf: Option<String>,
    pub recording_uri: Option<String>,
    pub transfer_recording_uri: Option<String>,
}

/// One SMS send (wave, confirmation, or service reply).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsLogEntry {
    pub occurrence_id: Option<OccurrenceId>,
    pub staff_id: Option<StaffId>,
    pub phone: String,
    pub wave: Option<u8>,
    pub body: String,
    pub accepted_by_carrier: bool,
    pub sent_at: DateTime<Utc>,
}

/// Correlation target for an inbound SMS reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveCorrelation {
    pub occurrence_id: OccurrenceId,
    pub staff_id: StaffId,
    pub wave: u8,
}
