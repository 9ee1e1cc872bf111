//! Engine-local durable state
//!
//! Small sqlx tables the engine owns outright (as opposed to the external
//! records store): in-flight outbound offers for webhook correlation, and
//! the per-number help-reply throttle.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::types::{CallSid, OccurrenceId, StaffId};

/// Persisted in-flight outbound offer, keyed by carrier call id.
#[derive(Debug, Clone, FromRow)]
pub struct OfferRow {
    pub call_sid: String,
    pub occurrence_id: String,
    pub staff_id: String,
    pub epoch: i64,
    pub round: i64,
    pub staff_idx: i64,
    /// Offer-call state-machine label (dialing, in_offer, retry_prompt, …).
    pub state: String,
    /// Whether the invalid-digit re-prompt has been spent.
    pub reprompted: bool,
    /// Set once a terminal callback has handled this offer; later callbacks
    /// for the same call become no-ops.
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl OfferRow {
    pub fn occurrence_id(&self) -> OccurrenceId {
        OccurrenceId::new(self.occurrence_id.clone())
    }

    pub fn staff_id(&self) -> StaffId {
        StaffId::new(self.staff_id.clone())
    }
}

/// sqlx-backed store for engine-local rows.
#[derive(Clone)]
pub struct EngineStore {
    pool: SqlitePool,
}

impl EngineStore {
    pub async fn new(pool: SqlitePool) -> sqlx::Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS outbound_offers (
                call_sid      TEXT PRIMARY KEY,
                occurrence_id TEXT NOT NULL,
                staff_id      TEXT NOT NULL,
                epoch         INTEGER NOT NULL,
                round         INTEGER NOT NULL,
                staff_idx     INTEGER NOT NULL,
                state         TEXT NOT NULL,
                reprompted    INTEGER NOT NULL DEFAULT 0,
                resolved      INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS help_replies (
                phone        TEXT PRIMARY KEY,
                last_sent_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_offer(
        &self,
        call_sid: &CallSid,
        occurrence: &OccurrenceId,
        staff: &StaffId,
        epoch: i64,
        round: u32,
        staff_idx: u32,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO outbound_offers
                (call_sid, occurrence_id, staff_id, epoch, round, staff_idx,
                 state, reprompted, resolved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'dialing', 0, 0, ?7)",
        )
        .bind(call_sid.as_str())
        .bind(occurrence.as_str())
        .bind(staff.as_str())
        .bind(epoch)
        .bind(round as i64)
        .bind(staff_idx as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn offer(&self, call_sid: &CallSid) -> sqlx::Result<Option<OfferRow>> {
        sqlx::query_as::<_, OfferRow>(
            "SELECT call_sid, occurrence_id, staff_id, epoch, round, staff_idx,
                    state, reprompted, resolved, created_at
             FROM outbound_offers WHERE call_sid = ?1",
        )
        .bind(call_sid.as_str())
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn set_offer_state(&self, call_sid: &CallSid, state: &str) -> sqlx::Result<()> {
        sqlx::query("UPDATE outbound_offers SET state = ?2 WHERE call_sid = ?1")
            .bind(call_sid.as_str())
            .bind(state)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Spend the single invalid-digit re-prompt. Returns `true` when the
    /// re-prompt was still available.
    pub async fn spend_reprompt(&self, call_sid: &CallSid) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE outbound_offers SET reprompted = 1, state = 'retry_prompt'
             WHERE call_sid = ?1 AND reprompted = 0",
        )
        .bind(call_sid.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Claim terminal handling of this offer. The response and status
    /// webhooks can both fire for one call; exactly one of them wins this
    /// flag and advances the cascade.
    pub async fn resolve_offer(&self, call_sid: &CallSid, state: &str) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE outbound_offers SET resolved = 1, state = ?2
             WHERE call_sid = ?1 AND resolved = 0",
        )
        .bind(call_sid.as_str())
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Help-reply throttle: returns `true` (and records the send) when no
    /// help reply has gone to `phone` within `interval`.
    pub async fn help_reply_due(
        &self,
        phone: &str,
        interval: std::time::Duration,
    ) -> sqlx::Result<bool> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::hours(24));
        let result = sqlx::query(
            "INSERT INTO help_replies (phone, last_sent_at) VALUES (?1, ?2)
             ON CONFLICT(phone) DO UPDATE SET last_sent_at = ?2
             WHERE help_replies.last_sent_at <= ?3",
        )
        .bind(phone)
        .bind(Utc::now())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    async fn store() -> EngineStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        EngineStore::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn offer_round_trips() {
        let store = store().await;
        let sid = CallSid::from("CA1");
        store
            .insert_offer(
                &sid,
                &OccurrenceId::from("occ-1"),
                &StaffId::from("staff-1"),
                2,
                1,
                0,
            )
            .await
            .unwrap();
        let row = store.offer(&sid).await.unwrap().unwrap();
        assert_eq!(row.state, "dialing");
        assert_eq!(row.epoch, 2);
        assert!(!row.resolved);
    }

    #[tokio::test]
    async fn reprompt_is_single_use() {
        let store = store().await;
        let sid = CallSid::from("CA1");
        store
            .insert_offer(
                &sid,
                &OccurrenceId::from("occ-1"),
                &StaffId::from("staff-1"),
                1,
                1,
                0,
            )
            .await
            .unwrap();
        assert!(store.spend_reprompt(&sid).await.unwrap());
        assert!(!store.spend_reprompt(&sid).await.unwrap());
    }

    #[tokio::test]
    async fn resolution_is_claimed_once() {
        let store = store().await;
        let sid = CallSid::from("CA1");
        store
            .insert_offer(
                &sid,
                &OccurrenceId::from("occ-1"),
                &StaffId::from("staff-1"),
                1,
                1,
                0,
            )
            .await
            .unwrap();
        assert!(store.resolve_offer(&sid, "declined").await.unwrap());
        // The status callback arriving second must not advance the cascade.
        assert!(!store.resolve_offer(&sid, "no_answer").await.unwrap());
        let row = store.offer(&sid).await.unwrap().unwrap();
        assert_eq!(row.state, "declined");
    }

    #[tokio::test]
    async fn help_reply_throttles_per_number() {
        let store = store().await;
        let day = Duration::from_secs(24 * 3600);
        assert!(store.help_reply_due("+61400000001", day).await.unwrap());
        assert!(!store.help_reply_due("+61400000001", day).await.unwrap());
        // A different number is unaffected.
        assert!(store.help_reply_due("+61400000002", day).await.unwrap());
    }
}
