//! Engine-level configuration
//!
//! Per-provider settings (wait minutes, rounds, templates) come from the
//! records API; this is the process-wide configuration shared by every
//! worker.

use std::time::Duration;

/// Process-wide engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Public base URL the carrier calls back on (webhook + audio URLs).
    pub base_url: String,
    /// Country calling prefixes accepted by the regional phone validator.
    pub allowed_country_prefixes: Vec<String>,
    /// SMS bodies classified as an acceptance (matched case-insensitively
    /// after punctuation is stripped).
    pub accept_keywords: Vec<String>,
    /// SMS bodies classified as a decline.
    pub decline_keywords: Vec<String>,
    /// Minimum gap between help replies to the same number.
    pub help_reply_interval: Duration,
    /// DTMF gather timeout on outbound offers.
    pub dtmf_timeout: Duration,
    /// Ring timeout for outbound offer calls.
    pub ring_timeout: Duration,
    /// How many times `try_accept` retries a lost conditional update before
    /// reporting contention.
    pub accept_retry_limit: u32,
    /// TTS voice used for generated prompts.
    pub voice: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            allowed_country_prefixes: vec!["+61".to_string()],
            accept_keywords: ["YES", "Y", "YEP", "ACCEPT", "CONFIRM", "OK"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            decline_keywords: ["NO", "N", "NOPE", "DECLINE", "PASS", "CANT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            help_reply_interval: Duration::from_secs(24 * 3600),
            dtmf_timeout: Duration::from_secs(15),
            ring_timeout: Duration::from_secs(30),
            accept_retry_limit: 4,
            voice: "en-AU-standard-b".to_string(),
        }
    }
}

impl EngineConfig {
    /// Webhook URL for the outbound answer leg.
    pub fn answer_url(&self, call_ref: &str) -> String {
        format!("{}/webhooks/outbound/answer?{}", self.base_url, call_ref)
    }

    /// Webhook URL for DTMF responses on an outbound offer.
    pub fn response_url(&self, call_ref: &str) -> String {
        format!("{}/webhooks/outbound/response?{}", self.base_url, call_ref)
    }

    /// Webhook URL for carrier status callbacks.
    pub fn status_url(&self, call_ref: &str) -> String {
        format!("{}/webhooks/outbound/status?{}", self.base_url, call_ref)
    }

    /// Per-call prompt audio served to the carrier's `<Play>`.
    pub fn audio_url(&self, call_sid: &str) -> String {
        format!("{}/audio/{}", self.base_url, call_sid)
    }
}
