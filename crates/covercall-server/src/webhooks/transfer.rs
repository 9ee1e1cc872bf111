//! Transfer dial-result and hold webhooks

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::Form;

use covercall_escalation::types::CallSid;

use super::{field, verify_signature};
use crate::error::{xml, xml_fallback, ApiError};
use crate::state::AppState;

/// Action URL of the representative `<Dial>`: reports whether the human
/// answered, and carries the carrier-side recording of the dial leg.
pub async fn transfer_complete_webhook(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Form(form): Form<Vec<(String, String)>>,
) -> Response {
    if let Err(e) = verify_signature(&state, &uri, &headers, &form) {
        return e.into_response();
    }
    let Some(call_sid) = query.get("callSid").cloned() else {
        return ApiError::MissingField("callSid").into_response();
    };
    let call_sid = CallSid::new(call_sid);
    let dial_status = field(&form, "DialCallStatus").unwrap_or("failed");
    let recording_url = field(&form, "RecordingUrl");

    match state
        .transfer
        .on_dial_result(&call_sid, dial_status, recording_url)
        .await
    {
        Ok(body) => xml(body),
        Err(e) => xml_fallback(e),
    }
}

/// Hold loop for parked callers.
pub async fn transfer_hold_webhook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(call_sid) = query.get("callSid").cloned() else {
        return ApiError::MissingField("callSid").into_response();
    };
    xml(state.transfer.hold_twiml(&CallSid::new(call_sid)))
}
