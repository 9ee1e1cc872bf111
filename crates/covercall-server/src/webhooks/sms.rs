//! Inbound SMS webhook
//!
//! Classifies the reply, correlates it to the sender's most recent open
//! wave, and drives `try_accept` or the decline/help paths. The response
//! is messaging TwiML; an optional `<Message>` texts the outcome back.

use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use axum::Form;
use tracing::{info, warn};

use covercall_escalation::carrier::twiml::Twiml;

use super::{required, verify_signature};
use crate::error::{xml, ApiError};
use crate::state::AppState;

pub async fn sms_webhook(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(form): Form<Vec<(String, String)>>,
) -> Response {
    match handle(&state, &uri, &headers, &form).await {
        Ok(response) => response,
        Err(e @ (ApiError::MissingField(_) | ApiError::BadSignature)) => {
            axum::response::IntoResponse::into_response(e)
        }
        Err(e) => {
            // Still a valid (empty) messaging document; the sender's reply
            // will be retried by the carrier or re-sent by the human.
            warn!(error = %e, "sms webhook failed");
            xml(Twiml::new().to_xml())
        }
    }
}

async fn handle(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
    form: &[(String, String)],
) -> Result<Response, ApiError> {
    verify_signature(state, uri, headers, form)?;
    let from = required(form, "From")?;
    let body = required(form, "Body")?;
    let message_sid = required(form, "MessageSid")?;

    let result = state
        .inbound_sms
        .handle_reply(from, body)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;
    info!(message = %message_sid, from = %from, disposition = ?result.disposition,
          "inbound sms handled");

    let mut twiml = Twiml::new();
    if let Some(reply) = result.reply {
        twiml = twiml.message(reply);
    }
    Ok(xml(twiml.to_xml()))
}
