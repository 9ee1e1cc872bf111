//! Speech synthesis seam
//!
//! Offer prompts are personalised per staff member; synthesized audio is
//! cached by `(template_id, variable_digest, voice)` so the same text is
//! never paid for twice. The per-call audio store backs the `<Play>` URL
//! handed to the carrier for a specific offer call.

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, warn};

/// µ-law silence byte (all-zero PCM encodes to 0xFF).
pub const ULAW_SILENCE: u8 = 0xFF;

/// A text-to-speech backend producing 8 kHz µ-law audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    async fn synthesize(&self, text: &str, voice: &str) -> anyhow::Result<Bytes>;
}

/// Cache key for a rendered prompt.
pub fn prompt_cache_key(template_id: &str, variable_digest: &str, voice: &str) -> String {
    format!("{template_id}:{variable_digest}:{voice}")
}

/// Synthesized-prompt cache keyed by [`prompt_cache_key`].
#[derive(Default)]
pub struct PromptCache {
    entries: DashMap<String, Bytes>,
}

impl PromptCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn insert(&self, key: String, audio: Bytes) {
        self.entries.insert(key, audio);
    }

    /// Fetch from cache or synthesize and remember.
    pub async fn get_or_synthesize(
        &self,
        tts: &dyn SpeechSynthesizer,
        key: String,
        text: &str,
        voice: &str,
    ) -> anyhow::Result<Bytes> {
        if let Some(audio) = self.get(&key) {
            debug!(key = %key, "prompt cache hit");
            return Ok(audio);
        }
        let audio = tts.synthesize(text, voice).await?;
        self.insert(key, audio.clone());
        Ok(audio)
    }
}

/// Audio staged for one outbound call, served by `GET /audio/{call_sid}`.
#[derive(Default)]
pub struct CallAudioStore {
    entries: DashMap<String, Bytes>,
}

impl CallAudioStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self, call_sid: &str, audio: Bytes) {
        self.entries.insert(call_sid.to_string(), audio);
    }

    pub fn get(&self, call_sid: &str) -> Option<Bytes> {
        self.entries.get(call_sid).map(|e| e.value().clone())
    }

    pub fn remove(&self, call_sid: &str) {
        self.entries.remove(call_sid);
    }
}

/// Production TTS client: request-level timeout with a single retry.
#[derive(Clone)]
pub struct HttpTts {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTts {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("failed to build TTS HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn request(&self, text: &str, voice: &str) -> anyhow::Result<Bytes> {
        let response = self
            .http
            .post(format!("{}/synthesize", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "text": text,
                "voice": voice,
                "format": "ulaw_8000",
            }))
            .send()
            .await
            .context("TTS request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("TTS service returned {}", response.status()));
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpTts {
    async fn synthesize(&self, text: &str, voice: &str) -> anyhow::Result<Bytes> {
        match self.request(text, voice).await {
            Ok(audio) => Ok(audio),
            Err(first) => {
                warn!(error = %first, "TTS failed, retrying once");
                self.request(text, voice).await
            }
        }
    }
}

/// Test/local synthesizer: one second of µ-law silence per request.
pub struct NullTts;

#[async_trait]
impl SpeechSynthesizer for NullTts {
    async fn synthesize(&self, _text: &str, _voice: &str) -> anyhow::Result<Bytes> {
        Ok(Bytes::from(vec![ULAW_SILENCE; 8000]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_synthesizes_once_per_key() {
        let cache = PromptCache::new();
        let key = prompt_cache_key("offer", "digest-1", "en-AU");
        let a = cache
            .get_or_synthesize(&NullTts, key.clone(), "hello", "en-AU")
            .await
            .unwrap();
        assert_eq!(a.len(), 8000);
        assert!(cache.get(&key).is_some());

        // A different digest misses.
        assert!(cache
            .get(&prompt_cache_key("offer", "digest-2", "en-AU"))
            .is_none());
    }

    #[tokio::test]
    async fn call_audio_store_round_trips() {
        let store = CallAudioStore::new();
        store.stage("CA1", Bytes::from_static(b"abc"));
        assert_eq!(store.get("CA1").unwrap(), Bytes::from_static(b"abc"));
        store.remove("CA1");
        assert!(store.get("CA1").is_none());
    }
}
