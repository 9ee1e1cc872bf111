//! Live-call termination signalling
//!
//! When `try_accept` succeeds, any call leg still playing an offer or an
//! IVR menu for that occurrence must wind down politely ("this shift has
//! just been taken"). Webhook-driven legs discover this at their next
//! callback via the records store; media-stream legs subscribe here and are
//! poked immediately.

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::types::{OccurrenceId, StaffId};

/// Notice that an occurrence has been assigned (or cancelled).
#[derive(Debug, Clone)]
pub enum TerminationNotice {
    TakenBy(StaffId),
    Cancelled,
}

/// Per-occurrence broadcast channels for live call legs.
#[derive(Default)]
pub struct LiveCallRegistry {
    channels: DashMap<OccurrenceId, broadcast::Sender<TerminationNotice>>,
}

impl LiveCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a live leg to termination notices for `occurrence`.
    pub fn subscribe(&self, occurrence: &OccurrenceId) -> broadcast::Receiver<TerminationNotice> {
        self.channels
            .entry(occurrence.clone())
            .or_insert_with(|| broadcast::channel(8).0)
            .subscribe()
    }

    /// Signal every subscribed leg and drop the channel.
    pub fn notify(&self, occurrence: &OccurrenceId, notice: TerminationNotice) {
        if let Some((_, sender)) = self.channels.remove(occurrence) {
            let _ = sender.send(notice);
        }
    }

    /// Drop a channel nobody needs any more.
    pub fn clear(&self, occurrence: &OccurrenceId) {
        self.channels.remove(occurrence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_taken_notice() {
        let registry = LiveCallRegistry::new();
        let occ = OccurrenceId::from("occ-1");
        let mut rx = registry.subscribe(&occ);
        registry.notify(&occ, TerminationNotice::TakenBy(StaffId::from("staff-2")));
        match rx.recv().await.unwrap() {
            TerminationNotice::TakenBy(staff) => assert_eq!(staff, StaffId::from("staff-2")),
            other => panic!("unexpected notice: {other:?}"),
        }
    }

    #[tokio::test]
    async fn notify_without_subscribers_is_harmless() {
        let registry = LiveCallRegistry::new();
        registry.notify(
            &OccurrenceId::from("occ-none"),
            TerminationNotice::Cancelled,
        );
    }
}
