//! Queue names, job payloads, and deterministic job ids
//!
//! Every payload carries the escalation epoch it was scheduled under; the
//! dispatching worker drops jobs whose epoch no longer matches the
//! occurrence. Job ids are deterministic so a re-enqueued step
//! de-duplicates instead of doubling sends.

use serde::{Deserialize, Serialize};

use crate::types::{OccurrenceId, ProviderId, StaffId};

/// Queue of `SendWave` jobs.
pub const QUEUE_SMS_WAVES: &str = "sms-waves";
/// Queue of cascade-start and offer jobs.
pub const QUEUE_OUTBOUND: &str = "outbound-calls";
/// Queue of post-acceptance confirmation messages.
pub const QUEUE_CONFIRMATION: &str = "confirmation-sms";

/// Send SMS wave `wave` to the whole pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendWaveJob {
    pub occurrence_id: OccurrenceId,
    pub provider_id: ProviderId,
    pub wave: u8,
    pub epoch: i64,
    /// Whether this is the final wave that was actually scheduled (wave 3,
    /// or an earlier wave when there was no time for all three).
    pub last_wave: bool,
}

/// Outbound-cascade work items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundJob {
    /// Flip the occurrence to CALLING and enqueue the first offer.
    CascadeStart {
        occurrence_id: OccurrenceId,
        epoch: i64,
    },
    /// Offer the shift to `pool[staff_idx]` during `round`.
    Offer {
        occurrence_id: OccurrenceId,
        epoch: i64,
        round: u32,
        staff_idx: u32,
    },
}

/// Confirmation SMS for the winning responder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmationSmsJob {
    pub occurrence_id: OccurrenceId,
    pub staff_id: StaffId,
    pub epoch: i64,
}

pub fn wave_job_id(occurrence: &OccurrenceId, epoch: i64, wave: u8) -> String {
    format!("wave:{occurrence}:{epoch}:{wave}")
}

pub fn cascade_job_id(occurrence: &OccurrenceId, epoch: i64) -> String {
    format!("cascade:{occurrence}:{epoch}")
}

pub fn offer_job_id(occurrence: &OccurrenceId, epoch: i64, round: u32, staff_idx: u32) -> String {
    format!("offer:{occurrence}:{epoch}:{round}:{staff_idx}")
}

pub fn confirmation_job_id(occurrence: &OccurrenceId, epoch: i64) -> String {
    format!("confirm:{occurrence}:{epoch}")
}
