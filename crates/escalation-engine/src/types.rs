//! Core identifiers and state enums shared across the engine

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// One instance of a shift to be filled.
    OccurrenceId
);
string_id!(
    /// A staff member in a provider's pool.
    StaffId
);
string_id!(
    /// A home-care provider (tenant).
    ProviderId
);
string_id!(
    /// Carrier-assigned call identifier. Unique across the call log and the
    /// call-session registry.
    CallSid
);

/// Escalation status of a shift occurrence.
///
/// Monotonic except `Assigned`, which is terminal for the escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccurrenceStatus {
    Open,
    #[serde(rename = "WAVE_1_SENT")]
    Wave1Sent,
    #[serde(rename = "WAVE_2_SENT")]
    Wave2Sent,
    #[serde(rename = "WAVE_3_SENT")]
    Wave3Sent,
    Calling,
    Assigned,
    UnfilledAfterCalls,
    Cancelled,
}

impl OccurrenceStatus {
    /// Status after wave `n` has been sent.
    pub fn wave_sent(n: u8) -> OccurrenceStatus {
        match n {
            1 => OccurrenceStatus::Wave1Sent,
            2 => OccurrenceStatus::Wave2Sent,
            _ => OccurrenceStatus::Wave3Sent,
        }
    }

    /// Terminal states accept no further escalation work.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OccurrenceStatus::Assigned
                | OccurrenceStatus::UnfilledAfterCalls
                | OccurrenceStatus::Cancelled
        )
    }

    /// States from which `try_accept` may assign the shift.
    pub fn is_acceptable(&self) -> bool {
        matches!(
            self,
            OccurrenceStatus::Open
                | OccurrenceStatus::Wave1Sent
                | OccurrenceStatus::Wave2Sent
                | OccurrenceStatus::Wave3Sent
                | OccurrenceStatus::Calling
        )
    }
}

impl fmt::Display for OccurrenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OccurrenceStatus::Open => "OPEN",
            OccurrenceStatus::Wave1Sent => "WAVE_1_SENT",
            OccurrenceStatus::Wave2Sent => "WAVE_2_SENT",
            OccurrenceStatus::Wave3Sent => "WAVE_3_SENT",
            OccurrenceStatus::Calling => "CALLING",
            OccurrenceStatus::Assigned => "ASSIGNED",
            OccurrenceStatus::UnfilledAfterCalls => "UNFILLED_AFTER_CALLS",
            OccurrenceStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Result of the single atomic assignment operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// This caller won the shift.
    Accepted,
    /// Somebody else (or a concurrent request for the same person) already
    /// holds the shift.
    AlreadyAssigned(StaffId),
    /// The staff member is not in the occurrence's pool.
    Ineligible,
    /// The occurrence is terminal (cancelled or unfilled-after-calls).
    Closed,
}

/// Which path an acceptance arrived through. Recorded on the call log and
/// the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptSource {
    SmsReply,
    OutboundDtmf,
    InboundIvr,
    Operator,
}

impl fmt::Display for AcceptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AcceptSource::SmsReply => "sms_reply",
            AcceptSource::OutboundDtmf => "outbound_dtmf",
            AcceptSource::InboundIvr => "inbound_ivr",
            AcceptSource::Operator => "operator",
        };
        f.write_str(s)
    }
}

/// Purpose of a call-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallPurpose {
    Ivr,
    OutboundOffer,
    Transfer,
}

/// Closed outcome set for a call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallOutcome {
    Accepted,
    Declined,
    NoAnswer,
    Busy,
    Failed,
    Voicemail,
    Completed,
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallOutcome::Accepted => "ACCEPTED",
            CallOutcome::Declined => "DECLINED",
            CallOutcome::NoAnswer => "NO_ANSWER",
            CallOutcome::Busy => "BUSY",
            CallOutcome::Failed => "FAILED",
            CallOutcome::Voicemail => "VOICEMAIL",
            CallOutcome::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}
