//! Operator event feed (server-sent events)
//!
//! `GET /events?provider_id=…` streams the provider's recent history from
//! the event store, then live events as they are published.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use covercall_escalation::events::EventRecord;
use covercall_escalation::types::ProviderId;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let provider = query
        .get("provider_id")
        .cloned()
        .ok_or(ApiError::MissingField("provider_id"))?;
    let provider = ProviderId::from(provider);

    // Subscribe before reading history so no event slips between the two.
    let live_rx = state.controller.events().subscribe();
    let history = state
        .controller
        .events()
        .history(&provider)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;

    let live_provider = provider.clone();
    let live = BroadcastStream::new(live_rx).filter_map(move |result| {
        let keep = match result {
            Ok(record) if record.provider_id == live_provider => Some(record),
            _ => None,
        };
        futures::future::ready(keep)
    });

    let stream = futures::stream::iter(history)
        .chain(live)
        .map(|record| Ok(to_sse_event(&record)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse_event(record: &EventRecord) -> Event {
    let data = serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string());
    Event::default().event("call-event").data(data)
}
