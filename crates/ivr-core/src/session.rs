//! Call sessions
//!
//! One session per inbound call, keyed by the carrier call id. The
//! `root_call_sid` (set at initial answer) groups audio across transfer
//! legs. Sessions live in process memory (the WebSocket that drives them
//! is pinned to this process) and the transfer path persists the subset a
//! later webhook needs.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use covercall_escalation::types::{CallSid, OccurrenceId, ProviderId, StaffId};

use crate::phases::IvrPhase;

/// Mutable state of one inbound call.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_sid: CallSid,
    /// Carrier id of the original caller leg; constant across transfers.
    pub root_call_sid: CallSid,
    pub from_phone: String,
    pub phase: IvrPhase,
    /// Failed tries within the current phase.
    pub attempts: u32,
    pub staff_id: Option<StaffId>,
    /// Providers the authenticated caller may act for.
    pub candidate_providers: Vec<ProviderId>,
    pub provider_id: Option<ProviderId>,
    pub occurrence_id: Option<OccurrenceId>,
    /// Reschedule fields collected so far.
    pub new_day: Option<u32>,
    pub new_month: Option<u32>,
    pub new_hour: Option<u32>,
    pub new_minute: Option<u32>,
    /// Caller asked for a representative; consulted by the capture close
    /// handler through the synchronous pending-transfer cache.
    pub pending_transfer: bool,
    pub started_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(call_sid: CallSid, from_phone: impl Into<String>) -> Self {
        Self {
            root_call_sid: call_sid.clone(),
            call_sid,
            from_phone: from_phone.into(),
            phase: IvrPhase::PinAuth,
            attempts: 0,
            staff_id: None,
            candidate_providers: Vec::new(),
            provider_id: None,
            occurrence_id: None,
            new_day: None,
            new_month: None,
            new_hour: None,
            new_minute: None,
            pending_transfer: false,
            started_at: Utc::now(),
        }
    }

    /// Move to a phase, resetting the attempt counter.
    pub fn enter(&mut self, phase: IvrPhase) {
        self.phase = phase;
        self.attempts = 0;
    }
}

/// Process-wide session registry keyed by call id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, CallSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: CallSession) {
        self.sessions
            .insert(session.call_sid.to_string(), session);
    }

    pub fn get(&self, call_sid: &CallSid) -> Option<CallSession> {
        self.sessions.get(call_sid.as_str()).map(|s| s.clone())
    }

    /// Run `f` against the live session, returning its result. `None` when
    /// the call id is unknown.
    pub fn with_mut<R>(
        &self,
        call_sid: &CallSid,
        f: impl FnOnce(&mut CallSession) -> R,
    ) -> Option<R> {
        self.sessions
            .get_mut(call_sid.as_str())
            .map(|mut s| f(&mut s))
    }

    /// Free the session when the final leg closes.
    pub fn remove(&self, call_sid: &CallSid) -> Option<CallSession> {
        self.sessions.remove(call_sid.as_str()).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_resets_attempts() {
        let mut session = CallSession::new(CallSid::from("CA1"), "+61400000001");
        session.attempts = 2;
        session.enter(IvrPhase::CollectJobCode);
        assert_eq!(session.phase, IvrPhase::CollectJobCode);
        assert_eq!(session.attempts, 0);
    }

    #[test]
    fn registry_round_trips_sessions() {
        let registry = SessionRegistry::new();
        registry.insert(CallSession::new(CallSid::from("CA1"), "+61400000001"));
        assert_eq!(registry.len(), 1);

        registry.with_mut(&CallSid::from("CA1"), |s| s.attempts = 2);
        assert_eq!(registry.get(&CallSid::from("CA1")).unwrap().attempts, 2);

        let removed = registry.remove(&CallSid::from("CA1")).unwrap();
        assert_eq!(removed.attempts, 2);
        assert!(registry.is_empty());
    }
}
