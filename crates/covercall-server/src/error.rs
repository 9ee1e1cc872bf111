//! HTTP error mapping
//!
//! Carrier-facing voice webhooks never surface raw errors; they degrade to
//! a spoken apology and hangup so the caller experience stays intact. JSON
//! endpoints map to conventional status codes.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use covercall_escalation::carrier::twiml::Twiml;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Required webhook field absent: 4xx, no state change.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Signature verification failed: 403, no state change.
    #[error("invalid webhook signature")]
    BadSignature,

    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::MissingField(field) => {
                (StatusCode::BAD_REQUEST, format!("missing field {field}")).into_response()
            }
            ApiError::BadSignature => (StatusCode::FORBIDDEN, "invalid signature").into_response(),
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::Internal(e) => {
                error!(error = %format!("{e:#}"), "internal server error");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// 200 with an XML content type (carrier webhook responses).
pub fn xml(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
        body,
    )
        .into_response()
}

/// The graceful-degradation response for voice webhooks: valid TwiML, an
/// apology, and a hangup.
pub fn xml_fallback<E: std::fmt::Display>(error: E) -> Response {
    error!(error = %error, "voice webhook failed, degrading gracefully");
    xml(Twiml::sorry_and_hangup())
}
