//! # Shift Escalation Engine
//!
//! Core of the covercall shift-filling orchestrator. When a home-care shift
//! becomes unfilled, this crate drives the replacement cascade:
//!
//! - three timed SMS waves over the candidate pool,
//! - an outbound round-robin call cascade when nobody replies,
//! - the single atomic assignment (`try_accept`) that guarantees a shift is
//!   given to exactly one responder under concurrent SMS replies and DTMF
//!   presses,
//! - best-effort cancellation of everything still queued once a shift is
//!   taken, backed by the escalation-epoch check at job dispatch.
//!
//! All time is expressed as durable jobs (see [`covercall_queue`]); the
//! controller never sleeps. The external records API is the single source of
//! truth for occurrence status and assignee; every mutation goes through its
//! conditional (version-token) update.
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │           EscalationController            │
//! ├───────────────────────────────────────────┤
//! │ ┌──────────┐ ┌───────────┐ ┌────────────┐ │
//! │ │ SMS wave │ │ Outbound  │ │ Confirm    │ │
//! │ │ worker   │ │ cascade   │ │ SMS worker │ │
//! │ └──────────┘ └───────────┘ └────────────┘ │
//! └───────────────────────────────────────────┘
//!        │               │              │
//!   ┌────────┐      ┌─────────┐    ┌────────┐
//!   │ Records│      │ JobQueue│    │ Carrier│
//!   │  API   │      │ (sqlx)  │    │  REST  │
//!   └────────┘      └─────────┘    └────────┘
//! ```

pub mod carrier;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod jobs;
pub mod live;
pub mod outbound;
pub mod phone;
pub mod prelude;
pub mod records;
pub mod sms;
pub mod store;
pub mod template;
pub mod testutil;
pub mod tts;
pub mod types;

pub use config::EngineConfig;
pub use controller::EscalationController;
pub use error::{EscalationError, Result};
