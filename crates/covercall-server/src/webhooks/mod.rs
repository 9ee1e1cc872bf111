//! Carrier webhook handlers

pub mod outbound;
pub mod sms;
pub mod transfer;
pub mod voice;

use axum::http::{HeaderMap, Uri};

use covercall_escalation::carrier::signature;

use crate::error::ApiError;
use crate::state::AppState;

/// Signature header carried on every carrier webhook.
pub const SIGNATURE_HEADER: &str = "x-carrier-signature";

/// Verify the carrier's HMAC-SHA1 signature over the public URL plus the
/// sorted form parameters. An empty configured token disables verification
/// (local development against fakes).
pub(crate) fn verify_signature(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
    form: &[(String, String)],
) -> Result<(), ApiError> {
    if state.carrier_auth_token.is_empty() {
        return Ok(());
    }
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::BadSignature)?;
    let url = format!(
        "{}{}",
        state.base_url(),
        uri.path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path())
    );
    if signature::verify(&state.carrier_auth_token, &url, form, provided) {
        Ok(())
    } else {
        Err(ApiError::BadSignature)
    }
}

/// Fetch a required form field.
pub(crate) fn required<'a>(
    form: &'a [(String, String)],
    name: &'static str,
) -> Result<&'a str, ApiError> {
    field(form, name).ok_or(ApiError::MissingField(name))
}

/// Fetch an optional form field.
pub(crate) fn field<'a>(form: &'a [(String, String)], name: &str) -> Option<&'a str> {
    form.iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}
