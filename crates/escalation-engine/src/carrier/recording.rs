//! Recording carrier double for tests and local development
//!
//! Captures every send instead of touching the network, and mints
//! deterministic call ids so scenario tests can drive the webhook side.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{OutboundCallRequest, SmsCarrier, VoiceCarrier};
use crate::types::CallSid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentSms {
    pub to: String,
    pub from: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCall {
    pub call_sid: CallSid,
    pub request: OutboundCallRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRedirect {
    pub call_sid: CallSid,
    pub twiml: String,
}

#[derive(Default)]
pub struct RecordingCarrier {
    counter: AtomicU64,
    sms: Mutex<Vec<SentSms>>,
    calls: Mutex<Vec<SentCall>>,
    redirects: Mutex<Vec<SentRedirect>>,
    hangups: Mutex<Vec<CallSid>>,
    /// When set, the next SMS send fails once (transient-error testing).
    fail_next_sms: Mutex<bool>,
}

impl RecordingCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sms_sent(&self) -> Vec<SentSms> {
        self.sms.lock().clone()
    }

    pub fn calls_placed(&self) -> Vec<SentCall> {
        self.calls.lock().clone()
    }

    pub fn redirects(&self) -> Vec<SentRedirect> {
        self.redirects.lock().clone()
    }

    pub fn hangups(&self) -> Vec<CallSid> {
        self.hangups.lock().clone()
    }

    pub fn fail_next_sms(&self) {
        *self.fail_next_sms.lock() = true;
    }
}

#[async_trait]
impl SmsCarrier for RecordingCarrier {
    async fn send_sms(&self, to: &str, from: &str, body: &str) -> anyhow::Result<String> {
        if std::mem::take(&mut *self.fail_next_sms.lock()) {
            anyhow::bail!("injected carrier failure");
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.sms.lock().push(SentSms {
            to: to.to_string(),
            from: from.to_string(),
            body: body.to_string(),
        });
        Ok(format!("SM{n:08}"))
    }
}

#[async_trait]
impl VoiceCarrier for RecordingCarrier {
    async fn originate(&self, request: OutboundCallRequest) -> anyhow::Result<CallSid> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let call_sid = CallSid::new(format!("CA{n:08}"));
        self.calls.lock().push(SentCall {
            call_sid: call_sid.clone(),
            request,
        });
        Ok(call_sid)
    }

    async fn redirect(&self, call_sid: &CallSid, twiml: &str) -> anyhow::Result<()> {
        self.redirects.lock().push(SentRedirect {
            call_sid: call_sid.clone(),
            twiml: twiml.to_string(),
        });
        Ok(())
    }

    async fn hangup(&self, call_sid: &CallSid) -> anyhow::Result<()> {
        self.hangups.lock().push(call_sid.clone());
        Ok(())
    }
}
