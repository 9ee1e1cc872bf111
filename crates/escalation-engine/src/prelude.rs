//! Convenient re-exports for engine consumers

pub use crate::carrier::{
    CarrierCallStatus, HttpCarrier, OutboundCallRequest, RecordingCarrier, SmsCarrier,
    VoiceCarrier,
};
pub use crate::config::EngineConfig;
pub use crate::controller::EscalationController;
pub use crate::error::{EscalationError, Result};
pub use crate::events::{EventKind, EventPublisher, EventRecord};
pub use crate::jobs::{
    ConfirmationSmsJob, OutboundJob, SendWaveJob, QUEUE_CONFIRMATION, QUEUE_OUTBOUND,
    QUEUE_SMS_WAVES,
};
pub use crate::live::{LiveCallRegistry, TerminationNotice};
pub use crate::outbound::{OfferCallState, OutboundOrchestrator};
pub use crate::phone::PhoneValidator;
pub use crate::records::{
    CallLogEntry, CallLogPatch, HttpRecordsClient, InMemoryRecords, OccurrencePatch,
    ProviderConfig, RecordsApi, ShiftOccurrence, SmsLogEntry, StaffMember, UpdateOutcome,
};
pub use crate::sms::{ConfirmationSmsWorker, InboundSmsHandler, SmsWaveWorker};
pub use crate::store::EngineStore;
pub use crate::tts::{CallAudioStore, HttpTts, NullTts, PromptCache, SpeechSynthesizer};
pub use crate::types::{
    AcceptOutcome, AcceptSource, CallOutcome, CallPurpose, CallSid, OccurrenceId,
    OccurrenceStatus, ProviderId, StaffId,
};
