//! Per-call prompt audio endpoint
//!
//! Serves the pre-generated µ-law prompt for one outbound offer call,
//! referenced by the `<Play>` inside the carrier's gather.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

pub async fn call_audio(
    State(state): State<AppState>,
    Path(call_sid): Path<String>,
) -> Response {
    match state.call_audio.get(&call_sid) {
        Some(audio) => (
            StatusCode::OK,
            // audio/basic is 8 kHz µ-law per RFC 2046.
            [(header::CONTENT_TYPE, "audio/basic")],
            audio.to_vec(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
