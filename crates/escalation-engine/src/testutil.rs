//! Shared fixtures for unit, property, and scenario tests
//!
//! Deterministic builders over the in-memory records store so every test
//! (here, in `ivr-core`, and in the server crate) seeds the same shaped
//! world.

use chrono::{DateTime, NaiveTime, Utc};
use sha2::{Digest, Sha256};

use crate::records::{ProviderConfig, ShiftOccurrence, StaffMember};
use crate::types::{OccurrenceId, OccurrenceStatus, ProviderId, StaffId};

/// Stable small number derived from an id, used to mint distinct phone
/// numbers, PINs, and job codes per fixture.
fn stable_seed(id: &str) -> u32 {
    id.bytes()
        .fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32))
}

/// Deterministic E.164 number for a staff fixture.
pub fn phone_for(id: &str) -> String {
    format!("+614{:08}", stable_seed(id) % 100_000_000)
}

/// Deterministic 4-digit IVR PIN for a staff fixture.
pub fn pin_for(id: &str) -> String {
    format!("{:04}", stable_seed(id) % 10_000)
}

pub fn sha256_hex(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn provider_fixture(id: &str) -> ProviderConfig {
    ProviderConfig {
        provider_id: ProviderId::from(id),
        display_name: format!("Provider {id}"),
        outbound_enabled: true,
        wait_minutes: 5,
        max_rounds: 2,
        message_template:
            "Hi {employeeName}, can you cover {patientName} on {date}, {startTime} to {endTime}, in {suburb}? Reply YES to take the shift or NO to pass."
                .to_string(),
        wave_interval_min: 2,
        wave_interval_max: 30,
        sms_sender: "+61400000100".to_string(),
        voice_sender: "+61400000101".to_string(),
        representative_phone: "+61400000199".to_string(),
    }
}

pub fn staff_fixture(id: &str) -> StaffMember {
    StaffMember {
        staff_id: StaffId::from(id),
        display_name: format!("Staff {id}"),
        phone_e164: phone_for(id),
        languages: vec!["en".to_string()],
        pin_hash: sha256_hex(&pin_for(id)),
        provider_ids: vec![ProviderId::from("prov-1")],
    }
}

pub fn occurrence_fixture(
    id: &str,
    provider: &str,
    pool: &[&str],
    scheduled_at: DateTime<Utc>,
) -> ShiftOccurrence {
    ShiftOccurrence {
        occurrence_id: OccurrenceId::from(id),
        provider_id: ProviderId::from(provider),
        patient_ref: format!("patient-ref-{}", stable_seed(id) % 1000),
        patient_name: "Mr Brown".to_string(),
        suburb: "Newtown".to_string(),
        scheduled_at,
        time_zone: "Australia/Sydney".to_string(),
        window_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
        window_end: NaiveTime::from_hms_opt(13, 0, 0).unwrap_or_default(),
        job_code: format!("{:04}", stable_seed(id) % 10_000),
        pool: pool.iter().map(|s| StaffId::from(*s)).collect(),
        status: OccurrenceStatus::Open,
        assignee: None,
        escalation_epoch: 0,
        version: 0,
    }
}
