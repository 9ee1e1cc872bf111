//! Shared application state

use std::sync::Arc;

use covercall_escalation::controller::EscalationController;
use covercall_escalation::outbound::OutboundOrchestrator;
use covercall_escalation::sms::InboundSmsHandler;
use covercall_escalation::tts::{CallAudioStore, SpeechSynthesizer};
use covercall_ivr::{IvrMachine, TransferCoordinator};
use covercall_media::CapturePipeline;

/// Everything the handlers need, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<EscalationController>,
    pub orchestrator: Arc<OutboundOrchestrator>,
    pub inbound_sms: Arc<InboundSmsHandler>,
    pub machine: Arc<IvrMachine>,
    pub transfer: Arc<TransferCoordinator>,
    pub capture: Arc<CapturePipeline>,
    pub call_audio: Arc<CallAudioStore>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    /// Carrier auth token used to verify webhook signatures.
    pub carrier_auth_token: String,
}

impl AppState {
    /// Public base URL (from the engine config).
    pub fn base_url(&self) -> &str {
        &self.controller.config().base_url
    }

    /// Derived WebSocket URL of the media stream endpoint.
    pub fn stream_url(&self) -> String {
        let base = self.base_url();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/streams/call")
    }
}
