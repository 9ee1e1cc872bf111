//! # Records-API Facade
//!
//! Typed access to the external records store, the single source of truth
//! for providers, staff, shift occurrences, and logs. The engine never
//! caches occurrence state: every decision re-reads, and every mutation is
//! a conditional update against the row's version token, which is what
//! makes `try_accept` safe under concurrent responders.
//!
//! [`HttpRecordsClient`] is the production client; [`InMemoryRecords`]
//! implements the same contract (including genuine compare-and-set
//! semantics) for tests and local development.

mod http;
mod memory;
mod models;

pub use http::HttpRecordsClient;
pub use memory::InMemoryRecords;
pub use models::{
    CallLogEntry, CallLogPatch, OccurrencePatch, ProviderConfig, ShiftOccurrence, SmsLogEntry,
    StaffMember, UpdateOutcome, WaveCorrelation,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{CallSid, OccurrenceId, ProviderId, StaffId};

/// The records store contract.
///
/// All methods may fail transiently (network, store timeouts); callers rely
/// on the job queue's retry policy rather than retrying inline, except for
/// the conditional-update loop in `try_accept`.
#[async_trait]
pub trait RecordsApi: Send + Sync + 'static {
    async fn occurrence(&self, id: &OccurrenceId) -> anyhow::Result<Option<ShiftOccurrence>>;

    /// Conditionally update an occurrence. The write applies only when the
    /// stored version still equals `expected_version`.
    async fn update_occurrence(
        &self,
        id: &OccurrenceId,
        expected_version: i64,
        patch: OccurrencePatch,
    ) -> anyhow::Result<UpdateOutcome>;

    async fn provider_config(&self, id: &ProviderId) -> anyhow::Result<Option<ProviderConfig>>;

    async fn staff(&self, id: &StaffId) -> anyhow::Result<Option<StaffMember>>;

    async fn staff_by_phone(&self, phone: &str) -> anyhow::Result<Option<StaffMember>>;

    /// Resolve an IVR caller by PIN hash.
    async fn staff_by_pin(&self, pin_hash: &str) -> anyhow::Result<Option<StaffMember>>;

    async fn occurrence_by_job_code(
        &self,
        provider: &ProviderId,
        job_code: &str,
    ) -> anyhow::Result<Option<ShiftOccurrence>>;

    /// Occurrences assigned to `staff` for the provider's current local day.
    async fn assigned_occurrences_today(
        &self,
        staff: &StaffId,
        provider: &ProviderId,
    ) -> anyhow::Result<Vec<ShiftOccurrence>>;

    /// Drop the staff member's assignment, re-opening the shift. This is
    /// the cancellation that feeds `start_escalation`.
    async fn release_assignment(
        &self,
        id: &OccurrenceId,
        staff: &StaffId,
        reason: &str,
    ) -> anyhow::Result<ShiftOccurrence>;

    /// Record a reschedule request for back-office handling.
    async fn request_reschedule(
        &self,
        id: &OccurrenceId,
        staff: &StaffId,
        new_start: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    async fn append_call_log(&self, entry: CallLogEntry) -> anyhow::Result<()>;

    async fn update_call_log(&self, call_sid: &CallSid, patch: CallLogPatch)
        -> anyhow::Result<()>;

    async fn append_sms_log(&self, entry: SmsLogEntry) -> anyhow::Result<()>;

    /// Reply correlation: the most recent wave sent to `phone` whose
    /// occurrence is still open (non-terminal).
    async fn latest_open_wave_for_phone(
        &self,
        phone: &str,
    ) -> anyhow::Result<Option<WaveCorrelation>>;
}
