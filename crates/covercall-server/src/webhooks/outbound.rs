//! Outbound offer webhooks: answer, DTMF response, call status

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Form;
use tracing::debug;

use covercall_escalation::carrier::CarrierCallStatus;
use covercall_escalation::types::CallSid;

use super::{field, required, verify_signature};
use crate::error::{xml, xml_fallback, ApiError};
use crate::state::AppState;

/// The answered offer leg asks for its gather + prompt document.
pub async fn answer_webhook(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(form): Form<Vec<(String, String)>>,
) -> Response {
    let call_sid = match protocol_checks(&state, &uri, &headers, &form) {
        Ok(sid) => sid,
        Err(e) => return e.into_response(),
    };
    match state.orchestrator.on_answer(&call_sid).await {
        Ok(body) => xml(body),
        Err(e) => xml_fallback(e),
    }
}

/// DTMF digits (or a timed-out gather) for an offer call.
pub async fn response_webhook(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Form(form): Form<Vec<(String, String)>>,
) -> Response {
    if let Err(e) = verify_signature(&state, &uri, &headers, &form) {
        return e.into_response();
    }
    // The call id arrives in the form on carrier posts, in the query on our
    // own gather-timeout redirect.
    let call_sid = field(&form, "CallSid")
        .map(str::to_string)
        .or_else(|| query.get("callId").cloned());
    let Some(call_sid) = call_sid else {
        return ApiError::MissingField("CallSid").into_response();
    };
    let call_sid = CallSid::new(call_sid);

    let digits = field(&form, "Digits")
        .map(str::to_string)
        .or_else(|| query.get("Digits").cloned())
        .filter(|d| !d.trim().is_empty());
    debug!(call = %call_sid, digits = ?digits, "offer response");

    match state
        .orchestrator
        .on_response(&call_sid, digits.as_deref())
        .await
    {
        Ok(body) => xml(body),
        Err(e) => xml_fallback(e),
    }
}

/// Ring results and hang-ups for offer calls.
pub async fn status_webhook(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(form): Form<Vec<(String, String)>>,
) -> Response {
    let call_sid = match protocol_checks(&state, &uri, &headers, &form) {
        Ok(sid) => sid,
        Err(e) => return e.into_response(),
    };
    let status_raw = match required(&form, "CallStatus") {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };
    let Some(status) = CarrierCallStatus::parse(status_raw) else {
        debug!(call = %call_sid, status = %status_raw, "ignoring unknown call status");
        return StatusCode::NO_CONTENT.into_response();
    };

    match state.orchestrator.on_status(&call_sid, status).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => ApiError::Internal(e.into()).into_response(),
    }
}

fn protocol_checks(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
    form: &[(String, String)],
) -> Result<CallSid, ApiError> {
    verify_signature(state, uri, headers, form)?;
    Ok(CallSid::new(required(form, "CallSid")?.to_string()))
}
