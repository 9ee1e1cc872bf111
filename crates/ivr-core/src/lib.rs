//! # Inbound IVR
//!
//! State machine for staff-initiated calls. A caller authenticates with a
//! PIN, keys in a job code for a shift they hold today, and then either
//! reschedules it, leaves it open (which feeds the escalation engine), or
//! is transferred to a human representative, with recording continuity
//! across the transfer handled by the media-capture pipeline.
//!
//! The voice bridge (WebSocket layer in the server crate) performs TTS and
//! DTMF capture against this machine: each [`IvrStep`] tells the bridge
//! what to say, what digits to expect, and whether to keep listening, hand
//! the call to a human, or end it.

pub mod auth;
pub mod datetime;
pub mod error;
pub mod machine;
pub mod phases;
pub mod prompts;
pub mod session;
pub mod transfer;

pub use error::{IvrError, Result};
pub use machine::{DigitPolicy, IvrMachine, IvrStep, StepAction};
pub use phases::IvrPhase;
pub use session::{CallSession, SessionRegistry};
pub use transfer::{ParkedCall, TransferCoordinator};
