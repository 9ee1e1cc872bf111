//! # Media Capture Pipeline
//!
//! The voice bridge delivers caller and agent audio as two 8 kHz µ-law
//! streams in 20 ms chunks over a WebSocket. This crate buffers both tracks
//! per call while the socket is live, carries audio across mid-call
//! transfer legs (grouped by the root call id), and archives a finished
//! call as one stereo µ-law WAV, caller on the left channel, agent on the
//! right.
//!
//! The transfer race matters: the WebSocket close handler must observe the
//! pending-transfer flag *synchronously* (an in-memory cache written at the
//! moment the transfer is requested), otherwise a close racing the durable
//! write would upload half a call.

pub mod archive;
pub mod capture;
pub mod error;
pub mod frames;
pub mod wav;

pub use archive::{HttpObjectStore, InMemoryRecordingStore, RecordingStore};
pub use capture::{CapturePipeline, CloseOutcome, PendingTransferCache};
pub use error::{MediaError, Result};
pub use frames::{MediaTrack, StreamFrame, FRAME_BYTES, FRAME_MS, SAMPLE_RATE};
