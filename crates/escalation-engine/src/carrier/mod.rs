//! # SMS / Voice carrier seam
//!
//! The engine talks to the telephony carrier through two narrow traits so
//! that workers and webhooks can be exercised without a network. The
//! production implementation is a REST client in [`http`]; tests use
//! [`RecordingCarrier`].

mod http;
mod recording;
pub mod signature;
pub mod twiml;

pub use http::HttpCarrier;
pub use recording::{RecordingCarrier, SentCall, SentRedirect, SentSms};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::CallSid;

/// Parameters for originating one outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCallRequest {
    pub to: String,
    pub from: String,
    /// Webhook returning the TwiML for the answered leg.
    pub answer_url: String,
    /// Webhook receiving call-status transitions.
    pub status_url: String,
    /// Ring timeout before the attempt counts as no-answer.
    pub ring_timeout_secs: u32,
}

/// Carrier call-status values delivered to the status webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CarrierCallStatus {
    Queued,
    Ringing,
    Answered,
    InProgress,
    Completed,
    NoAnswer,
    Busy,
    Canceled,
    Failed,
}

impl CarrierCallStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "ringing" => Some(Self::Ringing),
            "answered" => Some(Self::Answered),
            "in-progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "no-answer" => Some(Self::NoAnswer),
            "busy" => Some(Self::Busy),
            "canceled" => Some(Self::Canceled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Outbound SMS delivery.
#[async_trait]
pub trait SmsCarrier: Send + Sync + 'static {
    /// Send one message; returns the carrier message id.
    async fn send_sms(&self, to: &str, from: &str, body: &str) -> anyhow::Result<String>;
}

/// Outbound voice control.
#[async_trait]
pub trait VoiceCarrier: Send + Sync + 'static {
    /// Originate a call; returns the carrier call id once the dial is
    /// accepted (not answered).
    async fn originate(&self, request: OutboundCallRequest) -> anyhow::Result<CallSid>;

    /// Replace the control instructions of a live call (used for the
    /// mid-call transfer dial).
    async fn redirect(&self, call_sid: &CallSid, twiml: &str) -> anyhow::Result<()>;

    /// Hang up a live call.
    async fn hangup(&self, call_sid: &CallSid) -> anyhow::Result<()>;
}
