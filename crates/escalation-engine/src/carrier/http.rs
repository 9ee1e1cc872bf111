//! REST carrier client

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{OutboundCallRequest, SmsCarrier, VoiceCarrier};
use crate::types::CallSid;

/// Twilio-style REST client: basic auth, form-encoded writes.
#[derive(Clone)]
pub struct HttpCarrier {
    http: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

impl HttpCarrier {
    pub fn new(
        api_base: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build carrier HTTP client")?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/Accounts/{}{}", self.api_base, self.account_sid, path)
    }
}

#[async_trait]
impl SmsCarrier for HttpCarrier {
    async fn send_sms(&self, to: &str, from: &str, body: &str) -> anyhow::Result<String> {
        #[derive(Deserialize)]
        struct MessageResponse {
            sid: String,
        }
        let response = self
            .http
            .post(self.url("/Messages.json"))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", from), ("Body", body)])
            .send()
            .await
            .context("carrier SMS request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("carrier SMS send returned {}", response.status()));
        }
        let message: MessageResponse = response.json().await?;
        debug!(sid = %message.sid, to = %to, "sms accepted by carrier");
        Ok(message.sid)
    }
}

#[async_trait]
impl VoiceCarrier for HttpCarrier {
    async fn originate(&self, request: OutboundCallRequest) -> anyhow::Result<CallSid> {
        #[derive(Deserialize)]
        struct CallResponse {
            sid: String,
        }
        let timeout = request.ring_timeout_secs.to_string();
        let response = self
            .http
            .post(self.url("/Calls.json"))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", request.to.as_str()),
                ("From", request.from.as_str()),
                ("Url", request.answer_url.as_str()),
                ("StatusCallback", request.status_url.as_str()),
                ("Timeout", timeout.as_str()),
            ])
            .send()
            .await
            .context("carrier originate request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("carrier originate returned {}", response.status()));
        }
        let call: CallResponse = response.json().await?;
        debug!(sid = %call.sid, to = %request.to, "outbound call originated");
        Ok(CallSid::new(call.sid))
    }

    async fn redirect(&self, call_sid: &CallSid, twiml: &str) -> anyhow::Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/Calls/{call_sid}.json")))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Twiml", twiml)])
            .send()
            .await
            .context("carrier redirect request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("carrier redirect returned {}", response.status()));
        }
        Ok(())
    }

    async fn hangup(&self, call_sid: &CallSid) -> anyhow::Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/Calls/{call_sid}.json")))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await
            .context("carrier hangup request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("carrier hangup returned {}", response.status()));
        }
        Ok(())
    }
}
