//! Media-stream WebSocket: the voice-bridge side of the inbound IVR
//!
//! One socket per inbound call. Frames from the carrier (start, media,
//! dtmf, stop) drive the IVR machine; machine steps come back as
//! synthesized µ-law prompt frames. Caller audio and our prompts both feed
//! the capture pipeline so the archived recording carries the whole
//! conversation.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use covercall_escalation::live::TerminationNotice;
use covercall_escalation::records::CallLogPatch;
use covercall_escalation::types::CallSid;
use covercall_ivr::{DigitPolicy, IvrStep, StepAction};
use covercall_media::frames::{frame_chunks, MediaTrack, StreamFrame};
use covercall_media::CloseOutcome;

use crate::state::AppState;

pub async fn call_stream(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| drive_call(state, socket))
}

/// Accumulates DTMF digits against the current step's policy.
#[derive(Default)]
struct DigitCollector {
    buffer: String,
    policy: Option<DigitPolicy>,
}

impl DigitCollector {
    fn arm(&mut self, policy: Option<DigitPolicy>) {
        self.buffer.clear();
        self.policy = policy;
    }

    fn timeout(&self) -> Option<Duration> {
        self.policy
            .as_ref()
            .map(|p| Duration::from_secs(p.timeout_secs as u64))
    }

    /// Add one digit; returns the full group once complete.
    fn push(&mut self, digit: char) -> Option<String> {
        let policy = self.policy.as_ref()?;
        self.buffer.push(digit);
        let terminated = policy.terminator.is_some_and(|t| t == digit);
        if terminated || self.buffer.len() >= policy.max_digits {
            self.policy = None;
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }
}

async fn drive_call(state: AppState, mut socket: WebSocket) {
    let mut call_sid: Option<CallSid> = None;
    let mut collector = DigitCollector::default();
    let mut deadline: Option<Instant> = None;
    // Armed once the session selects an occurrence: a `try_accept` or
    // cancellation elsewhere winds this leg down politely.
    let mut termination: Option<broadcast::Receiver<TerminationNotice>> = None;

    loop {
        if termination.is_none() {
            if let Some(sid) = call_sid.as_ref() {
                if let Some(occurrence) = state
                    .machine
                    .sessions()
                    .get(sid)
                    .and_then(|s| s.occurrence_id)
                {
                    termination = Some(state.controller.live().subscribe(&occurrence));
                }
            }
        }

        let frame = tokio::select! {
            // Pends forever while unsubscribed; no precondition needed.
            notice = recv_notice(&mut termination) => {
                match notice {
                    Some(notice) => {
                        if let Some(sid) = call_sid.as_ref() {
                            let line = match notice {
                                TerminationNotice::TakenBy(_) =>
                                    "This shift has just been taken. Goodbye.",
                                TerminationNotice::Cancelled =>
                                    "This shift is no longer available. Goodbye.",
                            };
                            say(&state, &mut socket, sid, line).await;
                        }
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                    None => {
                        termination = None;
                        continue;
                    }
                }
            }
            message = socket.recv() => match message {
                Some(Ok(Message::Text(text))) => match StreamFrame::parse(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(error = %e, "unparseable stream frame dropped");
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) | None => StreamFrame::Stop,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "media stream receive error");
                    StreamFrame::Stop
                }
            },
            _ = wait_until(deadline), if deadline.is_some() => {
                deadline = None;
                let Some(sid) = call_sid.clone() else { continue };
                match state.machine.on_timeout(&sid).await {
                    Ok(step) => {
                        if run_step(&state, &mut socket, &sid, step, &mut collector, &mut deadline)
                            .await
                            .is_break()
                        {
                            break;
                        }
                        continue;
                    }
                    Err(e) => {
                        warn!(call = %sid, error = %e, "ivr timeout handling failed");
                        break;
                    }
                }
            }
        };

        match frame {
            StreamFrame::Start { start } => {
                let sid = start
                    .custom_parameters
                    .get("callSid")
                    .cloned()
                    .unwrap_or_else(|| start.call_sid.clone());
                let from = start
                    .custom_parameters
                    .get("from")
                    .cloned()
                    .unwrap_or_default();
                let sid = CallSid::new(sid);
                state.capture.begin(sid.as_str(), sid.as_str());

                match state.machine.on_call_start(&sid, &from).await {
                    Ok(step) => {
                        call_sid = Some(sid.clone());
                        if run_step(&state, &mut socket, &sid, step, &mut collector, &mut deadline)
                            .await
                            .is_break()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(call = %sid, error = %e, "ivr start failed");
                        break;
                    }
                }
            }
            StreamFrame::Media { media } => {
                let Some(sid) = call_sid.as_ref() else { continue };
                match media.decode_payload() {
                    Ok(audio) => state.capture.append(sid.as_str(), media.track, &audio),
                    Err(e) => debug!(error = %e, "bad media payload dropped"),
                }
            }
            StreamFrame::Dtmf { dtmf } => {
                let Some(sid) = call_sid.clone() else { continue };
                let Some(digit) = dtmf.digit.chars().next() else { continue };
                // Any keypress restarts the input window.
                if let Some(window) = collector.timeout() {
                    deadline = Some(Instant::now() + window);
                }
                if let Some(group) = collector.push(digit) {
                    deadline = None;
                    match state.machine.on_digits(&sid, &group).await {
                        Ok(step) => {
                            if run_step(
                                &state,
                                &mut socket,
                                &sid,
                                step,
                                &mut collector,
                                &mut deadline,
                            )
                            .await
                            .is_break()
                            {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(call = %sid, error = %e, "ivr digit handling failed");
                            break;
                        }
                    }
                }
            }
            StreamFrame::Mark { .. } => {}
            StreamFrame::Stop => break,
        }
    }

    if let Some(sid) = call_sid {
        finish(&state, &sid).await;
    }
}

/// Close-out path, run exactly once per socket: let the machine settle the
/// session, then close capture (which defers under a pending transfer).
async fn finish(state: &AppState, call_sid: &CallSid) {
    if let Err(e) = state.machine.on_hangup(call_sid).await {
        warn!(call = %call_sid, error = %e, "ivr hangup handling failed");
    }
    match state.capture.close(call_sid.as_str()).await {
        Ok(CloseOutcome::Uploaded(uri)) => {
            let patch = CallLogPatch {
                recording_uri: Some(uri),
                ..CallLogPatch::default()
            };
            if let Err(e) = state
                .controller
                .records()
                .update_call_log(call_sid, patch)
                .await
            {
                warn!(call = %call_sid, error = %e, "recording uri update failed");
            }
        }
        Ok(CloseOutcome::DeferredForTransfer) => {
            info!(call = %call_sid, "capture deferred for transfer");
        }
        Ok(CloseOutcome::Empty) => {}
        Err(e) => warn!(call = %call_sid, error = %e, "capture close failed"),
    }
}

enum StepFlow {
    Continue,
    Close,
}

impl StepFlow {
    fn is_break(&self) -> bool {
        matches!(self, StepFlow::Close)
    }
}

/// Synthesize one line, put it on the recording, and stream it to the
/// caller. Returns false once the socket is gone.
async fn say(state: &AppState, socket: &mut WebSocket, call_sid: &CallSid, text: &str) -> bool {
    let voice = state.controller.config().voice.clone();
    match state.tts.synthesize(text, &voice).await {
        Ok(audio) => {
            // Our side of the conversation goes on the recording too.
            state
                .capture
                .append(call_sid.as_str(), MediaTrack::Outbound, &audio);
            for chunk in frame_chunks(&audio) {
                let frame = StreamFrame::media(MediaTrack::Outbound, chunk);
                if socket.send(Message::Text(frame.to_json())).await.is_err() {
                    return false;
                }
            }
            true
        }
        Err(e) => {
            warn!(call = %call_sid, error = %e, "prompt synthesis failed");
            true
        }
    }
}

async fn recv_notice(
    rx: &mut Option<broadcast::Receiver<TerminationNotice>>,
) -> Option<TerminationNotice> {
    match rx {
        Some(rx) => rx.recv().await.ok(),
        None => futures::future::pending().await,
    }
}

/// Speak a step's prompts and apply its action.
async fn run_step(
    state: &AppState,
    socket: &mut WebSocket,
    call_sid: &CallSid,
    step: IvrStep,
    collector: &mut DigitCollector,
    deadline: &mut Option<Instant>,
) -> StepFlow {
    for prompt in &step.prompts {
        if !say(state, socket, call_sid, prompt).await {
            return StepFlow::Close;
        }
    }
    let _ = socket
        .send(Message::Text(StreamFrame::mark("prompt-complete").to_json()))
        .await;

    match step.action {
        StepAction::Listen => {
            collector.arm(step.expect);
            *deadline = collector.timeout().map(|window| Instant::now() + window);
            StepFlow::Continue
        }
        StepAction::BeginTransfer => {
            // Stage the transfer, then drop the stream: the carrier call
            // continues into the representative dial.
            if let Err(e) = state.transfer.begin(call_sid).await {
                warn!(call = %call_sid, error = %e, "transfer staging failed");
            }
            let _ = socket.send(Message::Close(None)).await;
            StepFlow::Close
        }
        StepAction::Hangup => {
            let _ = socket.send(Message::Close(None)).await;
            StepFlow::Close
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max: usize, terminator: Option<char>) -> DigitPolicy {
        DigitPolicy {
            max_digits: max,
            terminator,
            timeout_secs: 15,
        }
    }

    #[test]
    fn collector_completes_on_max_digits() {
        let mut collector = DigitCollector::default();
        collector.arm(Some(policy(4, None)));
        assert_eq!(collector.push('1'), None);
        assert_eq!(collector.push('2'), None);
        assert_eq!(collector.push('3'), None);
        assert_eq!(collector.push('4'), Some("1234".to_string()));
        // Disarmed until the next step.
        assert_eq!(collector.push('5'), None);
    }

    #[test]
    fn collector_completes_on_terminator() {
        let mut collector = DigitCollector::default();
        collector.arm(Some(policy(8, Some('#'))));
        assert_eq!(collector.push('4'), None);
        assert_eq!(collector.push('2'), None);
        assert_eq!(collector.push('#'), Some("42#".to_string()));
    }

    #[test]
    fn rearming_clears_stale_digits() {
        let mut collector = DigitCollector::default();
        collector.arm(Some(policy(2, None)));
        assert_eq!(collector.push('9'), None);
        collector.arm(Some(policy(1, None)));
        assert_eq!(collector.push('1'), Some("1".to_string()));
    }
}
