//! Production records client (reqwest)

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use super::models::{
    CallLogEntry, CallLogPatch, OccurrencePatch, ProviderConfig, ShiftOccurrence, SmsLogEntry,
    StaffMember, UpdateOutcome, WaveCorrelation,
};
use super::RecordsApi;
use crate::types::{CallSid, OccurrenceId, ProviderId, StaffId};

/// Records API client over HTTP with bearer-key auth.
#[derive(Clone)]
pub struct HttpRecordsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRecordsClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build records HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> anyhow::Result<Option<T>> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(anyhow!("records API GET {path} returned {status}")),
        }
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> anyhow::Result<()> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "records API POST {path} returned {}",
                response.status()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordsApi for HttpRecordsClient {
    async fn occurrence(&self, id: &OccurrenceId) -> anyhow::Result<Option<ShiftOccurrence>> {
        self.get_optional(&format!("/occurrences/{id}")).await
    }

    async fn update_occurrence(
        &self,
        id: &OccurrenceId,
        expected_version: i64,
        patch: OccurrencePatch,
    ) -> anyhow::Result<UpdateOutcome> {
        let path = format!("/occurrences/{id}?expected_version={expected_version}");
        let response = self
            .http
            .patch(self.url(&path))
            .bearer_auth(&self.api_key)
            .json(&patch)
            .send()
            .await
            .with_context(|| format!("PATCH {path}"))?;
        match response.status() {
            StatusCode::CONFLICT => {
                debug!(occurrence = %id, "conditional update lost the race");
                Ok(UpdateOutcome::Conflict)
            }
            status if status.is_success() => Ok(UpdateOutcome::Applied(response.json().await?)),
            status => Err(anyhow!("records API PATCH {path} returned {status}")),
        }
    }

    async fn provider_config(&self, id: &ProviderId) -> anyhow::Result<Option<ProviderConfig>> {
        self.get_optional(&format!("/providers/{id}/config")).await
    }

    async fn staff(&self, id: &StaffId) -> anyhow::Result<Option<StaffMember>> {
        self.get_optional(&format!("/staff/{id}")).await
    }

    async fn staff_by_phone(&self, phone: &str) -> anyhow::Result<Option<StaffMember>> {
        let phone = urlencode(phone);
        self.get_optional(&format!("/staff/lookup?phone={phone}"))
            .await
    }

    async fn staff_by_pin(&self, pin_hash: &str) -> anyhow::Result<Option<StaffMember>> {
        self.get_optional(&format!("/staff/lookup?pin_hash={pin_hash}"))
            .await
    }

    async fn occurrence_by_job_code(
        &self,
        provider: &ProviderId,
        job_code: &str,
    ) -> anyhow::Result<Option<ShiftOccurrence>> {
        self.get_optional(&format!(
            "/providers/{provider}/occurrences/by-code/{job_code}"
        ))
        .await
    }

    async fn assigned_occurrences_today(
        &self,
        staff: &StaffId,
        provider: &ProviderId,
    ) -> anyhow::Result<Vec<ShiftOccurrence>> {
        Ok(self
            .get_optional(&format!(
                "/staff/{staff}/occurrences?provider={provider}&window=today&assigned=true"
            ))
            .await?
            .unwrap_or_default())
    }

    async fn release_assignment(
        &self,
        id: &OccurrenceId,
        staff: &StaffId,
        reason: &str,
    ) -> anyhow::Result<ShiftOccurrence> {
        #[derive(Serialize)]
        struct Release<'a> {
            staff_id: &'a StaffId,
            reason: &'a str,
        }
        let path = format!("/occurrences/{id}/release");
        let response = self
            .http
            .post(self.url(&path))
            .bearer_auth(&self.api_key)
            .json(&Release {
                staff_id: staff,
                reason,
            })
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "records API POST {path} returned {}",
                response.status()
            ));
        }
        Ok(response.json().await?)
    }

    async fn request_reschedule(
        &self,
        id: &OccurrenceId,
        staff: &StaffId,
        new_start: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Reschedule<'a> {
            staff_id: &'a StaffId,
            new_start: DateTime<Utc>,
        }
        self.post_json(
            &format!("/occurrences/{id}/reschedule-request"),
            &Reschedule {
                staff_id: staff,
                new_start,
            },
        )
        .await
    }

    async fn append_call_log(&self, entry: CallLogEntry) -> anyhow::Result<()> {
        self.post_json("/call-log", &entry).await
    }

    async fn update_call_log(
        &self,
        call_sid: &CallSid,
        patch: CallLogPatch,
    ) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Patch<'a> {
            outcome: Option<String>,
            ended_at: Option<DateTime<Utc>>,
            dtmf: Option<&'a str>,
            recording_uri: Option<&'a str>,
            transfer_recording_uri: Option<&'a str>,
        }
        let body = Patch {
            outcome: patch.outcome.map(|o| o.to_string()),
            ended_at: patch.ended_at,
            dtmf: patch.dtmf.as_deref(),
            recording_uri: patch.recording_uri.as_deref(),
            transfer_recording_uri: patch.transfer_recording_uri.as_deref(),
        };
        self.post_json(&format!("/call-log/{call_sid}/outcome"), &body)
            .await
    }

    async fn append_sms_log(&self, entry: SmsLogEntry) -> anyhow::Result<()> {
        self.post_json("/sms-log", &entry).await
    }

    async fn latest_open_wave_for_phone(
        &self,
        phone: &str,
    ) -> anyhow::Result<Option<WaveCorrelation>> {
        #[derive(serde::Deserialize)]
        struct Correlation {
            occurrence_id: OccurrenceId,
            staff_id: StaffId,
            wave: u8,
        }
        let phone = urlencode(phone);
        Ok(self
            .get_optional::<Correlation>(&format!("/sms-log/latest-open?phone={phone}"))
            .await?
            .map(|c| WaveCorrelation {
                occurrence_id: c.occurrence_id,
                staff_id: c.staff_id,
                wave: c.wave,
            }))
    }
}

/// Minimal percent-encoding for phone numbers in query strings ('+' would
/// otherwise decode as a space).
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::urlencode;

    #[test]
    fn phone_numbers_are_percent_encoded() {
        assert_eq!(urlencode("+61412345678"), "%2B61412345678");
        assert_eq!(urlencode("abc-123"), "abc-123");
    }
}
