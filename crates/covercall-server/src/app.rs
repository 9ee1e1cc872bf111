//! Router assembly

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use covercall_escalation::types::CallSid;

use crate::audio::call_audio;
use crate::error::ApiError;
use crate::sse::event_stream;
use crate::state::AppState;
use crate::stream::call_stream;
use crate::webhooks::outbound::{answer_webhook, response_webhook, status_webhook};
use crate::webhooks::sms::sms_webhook;
use crate::webhooks::transfer::{transfer_complete_webhook, transfer_hold_webhook};
use crate::webhooks::voice::voice_webhook;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/voice", post(voice_webhook))
        .route("/webhooks/sms", post(sms_webhook))
        .route("/webhooks/outbound/answer", post(answer_webhook))
        .route("/webhooks/outbound/response", post(response_webhook))
        .route("/webhooks/outbound/status", post(status_webhook))
        .route(
            "/webhooks/transfer/complete",
            post(transfer_complete_webhook),
        )
        .route(
            "/webhooks/transfer/hold",
            get(transfer_hold_webhook).post(transfer_hold_webhook),
        )
        .route("/streams/call", get(call_stream))
        .route("/audio/:call_sid", get(call_audio))
        .route("/events", get(event_stream))
        .route("/operator/parked", get(parked_calls))
        .route("/operator/parked/:call_sid/pickup", post(pickup_parked))
        .route("/operator/queue", get(queue_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Callers currently holding for an operator.
async fn parked_calls(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let parked = state
        .transfer
        .parked_calls()
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;
    let rows: Vec<serde_json::Value> = parked
        .into_iter()
        .map(|p| {
            serde_json::json!({
                "call_sid": p.call_sid,
                "caller_phone": p.caller_phone,
                "provider_id": p.provider_id,
                "parked_at": p.parked_at,
            })
        })
        .collect();
    Ok(Json(rows))
}

/// An operator answered a parked caller.
async fn pickup_parked(
    State(state): State<AppState>,
    axum::extract::Path(call_sid): axum::extract::Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let taken = state
        .transfer
        .mark_picked_up(&CallSid::new(call_sid))
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;
    if taken {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

/// Durable-queue counters for the dashboard.
async fn queue_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .controller
        .queue()
        .stats()
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;
    Ok(Json(serde_json::json!({
        "scheduled": stats.scheduled,
        "running": stats.running,
        "succeeded": stats.succeeded,
        "failed": stats.failed,
        "cancelled": stats.cancelled,
    })))
}
