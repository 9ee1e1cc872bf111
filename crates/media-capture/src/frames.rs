//! Media-stream wire frames
//!
//! JSON events exchanged with the voice bridge over the call WebSocket.
//! Audio is 8 kHz µ-law, mono per track, 20 ms / 160-byte frames,
//! base64-encoded inside `media` events.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Samples per second on both tracks.
pub const SAMPLE_RATE: u32 = 8000;
/// Frame duration.
pub const FRAME_MS: u32 = 20;
/// µ-law bytes per frame (8000 Hz × 0.020 s).
pub const FRAME_BYTES: usize = 160;

/// Which side of the call a media frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaTrack {
    /// Caller audio (archived left).
    Inbound,
    /// Bridge/agent audio (archived right).
    Outbound,
}

impl MediaTrack {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaTrack::Inbound => "inbound",
            MediaTrack::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartInfo {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "callSid")]
    pub call_sid: String,
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub track: MediaTrack,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub payload: String,
}

impl MediaInfo {
    pub fn decode_payload(&self) -> Result<Bytes> {
        Ok(Bytes::from(BASE64.decode(&self.payload)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkInfo {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtmfInfo {
    pub digit: String,
}

/// One WebSocket event from or to the voice bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamFrame {
    Start { start: StartInfo },
    Media { media: MediaInfo },
    Mark { mark: MarkInfo },
    Dtmf { dtmf: DtmfInfo },
    Stop,
}

impl StreamFrame {
    pub fn parse(raw: &str) -> Result<StreamFrame> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"event\":\"stop\"}".to_string())
    }

    /// Build an outbound media frame from raw µ-law bytes.
    pub fn media(track: MediaTrack, audio: &[u8]) -> StreamFrame {
        StreamFrame::Media {
            media: MediaInfo {
                track,
                chunk: None,
                timestamp: None,
                payload: BASE64.encode(audio),
            },
        }
    }

    /// Mark frame used to learn when queued audio finished playing.
    pub fn mark(name: impl Into<String>) -> StreamFrame {
        StreamFrame::Mark {
            mark: MarkInfo { name: name.into() },
        }
    }
}

/// Split a µ-law clip into wire frames of [`FRAME_BYTES`] (the tail frame
/// may be short).
pub fn frame_chunks(audio: &[u8]) -> impl Iterator<Item = &[u8]> {
    audio.chunks(FRAME_BYTES)
}
