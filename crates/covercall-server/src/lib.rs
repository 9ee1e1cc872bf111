//! # covercall server
//!
//! The HTTP surface of the escalation engine: carrier webhooks (voice, SMS,
//! outbound answer/response/status, transfer), the media-stream WebSocket
//! that plays the voice-bridge role for the inbound IVR, the per-call
//! prompt audio endpoint, the operator SSE event feed, and the queue
//! workers, all wired together by [`server::CovercallServer`].

pub mod app;
pub mod audio;
pub mod config;
pub mod error;
pub mod server;
pub mod sse;
pub mod state;
pub mod stream;
pub mod webhooks;

pub use config::ServerConfig;
pub use server::CovercallServer;
pub use state::AppState;
