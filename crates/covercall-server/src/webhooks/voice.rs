//! Incoming voice webhook
//!
//! The carrier posts here when a staff member dials the roster line. We
//! answer with a `<Connect><Stream>` that opens the bidirectional media
//! stream to our WebSocket endpoint, carrying the call id and caller
//! number as stream parameters.

use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use axum::Form;
use tracing::info;

use covercall_escalation::carrier::twiml::Twiml;

use super::{required, verify_signature};
use crate::error::{xml, xml_fallback, ApiError};
use crate::state::AppState;

pub async fn voice_webhook(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(form): Form<Vec<(String, String)>>,
) -> Response {
    match handle(&state, &uri, &headers, &form) {
        Ok(response) => response,
        Err(e @ (ApiError::MissingField(_) | ApiError::BadSignature)) => {
            // Protocol violation: reject without touching any state.
            axum::response::IntoResponse::into_response(e)
        }
        Err(e) => xml_fallback(e),
    }
}

fn handle(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
    form: &[(String, String)],
) -> Result<Response, ApiError> {
    verify_signature(state, uri, headers, form)?;
    let call_sid = required(form, "CallSid")?;
    let from = required(form, "From")?;
    let _to = required(form, "To")?;

    info!(call = %call_sid, from = %from, "inbound voice call");
    let body = Twiml::new()
        .connect_stream(
            state.stream_url(),
            vec![
                ("callSid".to_string(), call_sid.to_string()),
                ("from".to_string(), from.to_string()),
            ],
        )
        .to_xml();
    Ok(xml(body))
}
