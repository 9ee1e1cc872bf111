//! # Event Stream Publisher
//!
//! Every state transition of interest emits an event record onto an
//! append-only per-provider stream with a 25-hour TTL, consumed by operator
//! dashboards over server-sent events. Publication is strictly best-effort:
//! it runs after the transition commits and can neither block nor fail the
//! transition; failures are logged and dropped.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::types::{CallSid, OccurrenceId, ProviderId};

/// Kinds of dashboard events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CallStarted,
    CallAuthenticated,
    AuthenticationFailed,
    IntentDetected,
    ShiftOpened,
    ShiftFilled,
    StaffNotified,
    EscalationRejected,
    EscalationCancelled,
    TransferInitiated,
    TransferCompleted,
    CallEnded,
    OutboundCallScheduled,
    OutboundCascadeCancelled,
    OutboundAllRoundsExhausted,
}

/// One record on a provider's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub provider_id: ProviderId,
    pub kind: EventKind,
    pub occurrence_id: Option<OccurrenceId>,
    pub call_sid: Option<CallSid>,
    /// Free-form detail payload for the dashboard.
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(provider_id: ProviderId, kind: EventKind) -> Self {
        Self {
            provider_id,
            kind,
            occurrence_id: None,
            call_sid: None,
            detail: serde_json::Value::Null,
            at: Utc::now(),
        }
    }

    pub fn occurrence(mut self, id: OccurrenceId) -> Self {
        self.occurrence_id = Some(id);
        self
    }

    pub fn call(mut self, sid: CallSid) -> Self {
        self.call_sid = Some(sid);
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    /// Stream key: `call-events:provider:{provider_id}:{date}`.
    pub fn stream_key(&self) -> String {
        format!(
            "call-events:provider:{}:{}",
            self.provider_id,
            self.at.format("%Y-%m-%d")
        )
    }
}

/// Durable + live event fan-out.
pub struct EventPublisher {
    pool: SqlitePool,
    live: broadcast::Sender<EventRecord>,
    ttl: Duration,
}

impl EventPublisher {
    /// 25 hours: a full day of history plus DST slack for the dashboards.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(25 * 3600);

    pub async fn new(pool: SqlitePool) -> sqlx::Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS call_events (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                stream      TEXT NOT NULL,
                provider_id TEXT NOT NULL,
                at          TEXT NOT NULL,
                body        TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_call_events_provider
             ON call_events (provider_id, id)",
        )
        .execute(&pool)
        .await?;
        let (live, _) = broadcast::channel(256);
        Ok(Self {
            pool,
            live,
            ttl: Self::DEFAULT_TTL,
        })
    }

    /// Emit one event. Never fails: storage or fan-out problems are logged
    /// and swallowed so state transitions are unaffected.
    pub async fn publish(&self, record: EventRecord) {
        debug!(kind = ?record.kind, provider = %record.provider_id, "event");
        match serde_json::to_string(&record) {
            Ok(body) => {
                let insert = sqlx::query(
                    "INSERT INTO call_events (stream, provider_id, at, body)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .bind(record.stream_key())
                .bind(record.provider_id.as_str())
                .bind(record.at)
                .bind(body)
                .execute(&self.pool)
                .await;
                if let Err(e) = insert {
                    warn!(error = %e, "event append failed");
                }
            }
            Err(e) => warn!(error = %e, "event serialization failed"),
        }
        // Live subscribers; a lagging or absent dashboard is not an error.
        let _ = self.live.send(record);
    }

    /// Recent history for one provider, oldest first.
    pub async fn history(&self, provider_id: &ProviderId) -> sqlx::Result<Vec<EventRecord>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(25));
        let rows = sqlx::query(
            "SELECT body FROM call_events
             WHERE provider_id = ?1 AND at > ?2
             ORDER BY id ASC",
        )
        .bind(provider_id.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| serde_json::from_str(&row.get::<String, _>("body")).ok())
            .collect())
    }

    /// Subscribe to live events (all providers; the SSE layer filters).
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.live.subscribe()
    }

    /// Drop records past the TTL. Returns rows removed.
    pub async fn reap(&self) -> sqlx::Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(25));
        let result = sqlx::query("DELETE FROM call_events WHERE at <= ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn publisher() -> EventPublisher {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        EventPublisher::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn history_is_per_provider_and_ordered() {
        let events = publisher().await;
        let p1 = ProviderId::from("prov-1");
        let p2 = ProviderId::from("prov-2");
        events
            .publish(EventRecord::new(p1.clone(), EventKind::ShiftOpened))
            .await;
        events
            .publish(EventRecord::new(p2.clone(), EventKind::CallStarted))
            .await;
        events
            .publish(EventRecord::new(p1.clone(), EventKind::StaffNotified))
            .await;

        let history = events.history(&p1).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, EventKind::ShiftOpened);
        assert_eq!(history[1].kind, EventKind::StaffNotified);
    }

    #[tokio::test]
    async fn live_subscribers_receive_events() {
        let events = publisher().await;
        let mut rx = events.subscribe();
        let p = ProviderId::from("prov-1");
        events
            .publish(
                EventRecord::new(p.clone(), EventKind::ShiftFilled)
                    .occurrence(OccurrenceId::from("occ-1")),
            )
            .await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::ShiftFilled);
        assert_eq!(received.occurrence_id, Some(OccurrenceId::from("occ-1")));
    }

    #[tokio::test]
    async fn stream_key_embeds_provider_and_date() {
        let record = EventRecord::new(ProviderId::from("prov-9"), EventKind::CallEnded);
        let key = record.stream_key();
        assert!(key.starts_with("call-events:provider:prov-9:"));
    }
}
