//! Per-call offer state machine
//!
//! Pure transition logic for one outbound offer call, mirrored into the
//! `outbound_offers` store so webhook callbacks can pick up where the
//! previous one left off.

use crate::types::CallOutcome;

/// Why an offer call reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    NoAnswer,
    Busy,
    Failed,
    Declined,
    /// The shift was assigned elsewhere while this call was live.
    ShiftTaken,
}

impl TerminationReason {
    pub fn outcome(&self) -> CallOutcome {
        match self {
            TerminationReason::NoAnswer => CallOutcome::NoAnswer,
            TerminationReason::Busy => CallOutcome::Busy,
            TerminationReason::Failed => CallOutcome::Failed,
            TerminationReason::Declined => CallOutcome::Declined,
            TerminationReason::ShiftTaken => CallOutcome::Completed,
        }
    }
}

/// State of one offer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferCallState {
    Dialing,
    InOffer,
    RetryPrompt,
    Accepted,
    Terminated(TerminationReason),
}

/// Events driving the offer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferEvent {
    Answered,
    NoAnswer,
    Busy,
    DialFailed,
    Digit(char),
    /// Gather expired without input.
    Timeout,
}

impl OfferCallState {
    /// Storage label for the `outbound_offers` row.
    pub fn label(&self) -> &'static str {
        match self {
            OfferCallState::Dialing => "dialing",
            OfferCallState::InOffer => "in_offer",
            OfferCallState::RetryPrompt => "retry_prompt",
            OfferCallState::Accepted => "accepted",
            OfferCallState::Terminated(TerminationReason::NoAnswer) => "no_answer",
            OfferCallState::Terminated(TerminationReason::Busy) => "busy",
            OfferCallState::Terminated(TerminationReason::Failed) => "failed",
            OfferCallState::Terminated(TerminationReason::Declined) => "declined",
            OfferCallState::Terminated(TerminationReason::ShiftTaken) => "taken",
        }
    }

    /// Reconstruct a state from its storage label. Unknown labels read as
    /// `Dialing` (the row's initial state).
    pub fn from_label(label: &str) -> OfferCallState {
        match label {
            "in_offer" => OfferCallState::InOffer,
            "retry_prompt" => OfferCallState::RetryPrompt,
            "accepted" => OfferCallState::Accepted,
            "no_answer" => OfferCallState::Terminated(TerminationReason::NoAnswer),
            "busy" => OfferCallState::Terminated(TerminationReason::Busy),
            "failed" => OfferCallState::Terminated(TerminationReason::Failed),
            "declined" => OfferCallState::Terminated(TerminationReason::Declined),
            "taken" => OfferCallState::Terminated(TerminationReason::ShiftTaken),
            _ => OfferCallState::Dialing,
        }
    }

    /// Advance on an event. Unexpected events leave the state unchanged
    /// (carrier callbacks can arrive out of order).
    pub fn on_event(self, event: OfferEvent) -> OfferCallState {
        use OfferCallState::*;
        match (self, event) {
            (Dialing, OfferEvent::Answered) => InOffer,
            (Dialing, OfferEvent::NoAnswer) => Terminated(TerminationReason::NoAnswer),
            (Dialing, OfferEvent::Busy) => Terminated(TerminationReason::Busy),
            (Dialing, OfferEvent::DialFailed) => Terminated(TerminationReason::Failed),

            (InOffer, OfferEvent::Digit('1')) => Accepted,
            (InOffer, OfferEvent::Digit('2')) => Terminated(TerminationReason::Declined),
            (InOffer, OfferEvent::Digit(_)) => RetryPrompt,
            (InOffer, OfferEvent::Timeout) => Terminated(TerminationReason::NoAnswer),

            (RetryPrompt, OfferEvent::Digit('1')) => Accepted,
            (RetryPrompt, OfferEvent::Digit('2')) => Terminated(TerminationReason::Declined),
            (RetryPrompt, OfferEvent::Digit(_)) => Terminated(TerminationReason::NoAnswer),
            (RetryPrompt, OfferEvent::Timeout) => Terminated(TerminationReason::NoAnswer),

            // The carrier dropped the leg mid-offer.
            (InOffer | RetryPrompt, OfferEvent::NoAnswer) => {
                Terminated(TerminationReason::NoAnswer)
            }
            (InOffer | RetryPrompt, OfferEvent::Busy) => Terminated(TerminationReason::Busy),
            (InOffer | RetryPrompt, OfferEvent::DialFailed) => {
                Terminated(TerminationReason::Failed)
            }

            (state, _) => state,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OfferCallState::Accepted | OfferCallState::Terminated(_))
    }
}
