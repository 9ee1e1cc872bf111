//! Recording archival
//!
//! Finished WAVs go to the provider's object store. Failures here never
//! affect escalation correctness; the caller logs them against the root
//! call id and moves on.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

/// Archival object store seam.
#[async_trait]
pub trait RecordingStore: Send + Sync + 'static {
    /// Store `wav` under `key`; returns the archived URI.
    async fn put(&self, key: &str, wav: Vec<u8>) -> anyhow::Result<String>;
}

/// Object-store client (PUT with bearer auth).
#[derive(Clone)]
pub struct HttpObjectStore {
    http: reqwest::Client,
    base_url: String,
    access_key: String,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>, access_key: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build object store client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_key: access_key.into(),
        })
    }
}

#[async_trait]
impl RecordingStore for HttpObjectStore {
    async fn put(&self, key: &str, wav: Vec<u8>) -> anyhow::Result<String> {
        let uri = format!("{}/{}", self.base_url, key);
        let response = self
            .http
            .put(&uri)
            .bearer_auth(&self.access_key)
            .header("content-type", "audio/wav")
            .body(wav)
            .send()
            .await
            .context("recording upload failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("object store returned {}", response.status()));
        }
        info!(key = %key, "recording archived");
        Ok(uri)
    }
}

/// Test/local store keeping recordings in memory.
#[derive(Default)]
pub struct InMemoryRecordingStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryRecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[async_trait]
impl RecordingStore for InMemoryRecordingStore {
    async fn put(&self, key: &str, wav: Vec<u8>) -> anyhow::Result<String> {
        self.objects.lock().insert(key.to_string(), wav);
        Ok(format!("memory://{key}"))
    }
}
