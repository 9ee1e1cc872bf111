//! Capture buffers and the across-transfer leg store
//!
//! While a call WebSocket is live its two tracks accumulate in memory. On
//! close, the buffers are appended to the durable leg store keyed by the
//! *root* call id, so a transferred call's later leg lands in the same
//! group. Only a close with no transfer pending performs the mix-and-upload.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::Mutex;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use crate::archive::RecordingStore;
use crate::error::{MediaError, Result};
use crate::frames::MediaTrack;
use crate::wav::mix_stereo_ulaw;

/// Synchronous pending-transfer flags.
///
/// Written at the moment a transfer is requested and read by the WebSocket
/// close handler *before* any await point, closing the race between the
/// close and the durable session write.
#[derive(Default)]
pub struct PendingTransferCache {
    pending: Mutex<HashSet<String>>,
}

impl PendingTransferCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, call_sid: &str) {
        self.pending.lock().insert(call_sid.to_string());
    }

    pub fn is_pending(&self, call_sid: &str) -> bool {
        self.pending.lock().contains(call_sid)
    }

    /// Consume the flag (a close observes it exactly once).
    pub fn take(&self, call_sid: &str) -> bool {
        self.pending.lock().remove(call_sid)
    }
}

struct LiveCapture {
    root_call_sid: String,
    inbound: BytesMut,
    outbound: BytesMut,
}

/// What happened when a call's WebSocket closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Transfer pending: audio appended under the root call, upload
    /// deferred to the final leg.
    DeferredForTransfer,
    /// Final leg closed: one WAV archived at this URI.
    Uploaded(String),
    /// Nothing was captured and nothing was stored.
    Empty,
}

/// Buffers µ-law tracks per live call and archives on final close.
pub struct CapturePipeline {
    live: DashMap<String, LiveCapture>,
    pending: Arc<PendingTransferCache>,
    pool: SqlitePool,
    archive: Arc<dyn RecordingStore>,
}

impl CapturePipeline {
    pub async fn new(
        pool: SqlitePool,
        pending: Arc<PendingTransferCache>,
        archive: Arc<dyn RecordingStore>,
    ) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS captured_legs (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                root_call_sid TEXT NOT NULL,
                track         TEXT NOT NULL,
                data          BLOB NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_captured_legs_root
             ON captured_legs (root_call_sid, track, seq)",
        )
        .execute(&pool)
        .await?;
        Ok(Self {
            live: DashMap::new(),
            pending,
            pool,
            archive,
        })
    }

    pub fn pending(&self) -> &Arc<PendingTransferCache> {
        &self.pending
    }

    /// Open buffers for a new WebSocket leg.
    pub fn begin(&self, call_sid: &str, root_call_sid: &str) {
        self.live.insert(
            call_sid.to_string(),
            LiveCapture {
                root_call_sid: root_call_sid.to_string(),
                inbound: BytesMut::new(),
                outbound: BytesMut::new(),
            },
        );
        debug!(call = %call_sid, root = %root_call_sid, "capture started");
    }

    /// Append one frame of µ-law audio to a live leg.
    pub fn append(&self, call_sid: &str, track: MediaTrack, audio: &[u8]) {
        if let Some(mut capture) = self.live.get_mut(call_sid) {
            match track {
                MediaTrack::Inbound => capture.inbound.extend_from_slice(audio),
                MediaTrack::Outbound => capture.outbound.extend_from_slice(audio),
            }
        }
    }

    /// Close a leg's capture.
    ///
    /// Always appends the leg's buffers under the root call id first; then,
    /// unless a transfer is pending, mixes every stored leg into one stereo
    /// WAV, uploads it, and deletes the group.
    pub async fn close(&self, call_sid: &str) -> Result<CloseOutcome> {
        let Some((_, capture)) = self.live.remove(call_sid) else {
            return Err(MediaError::UnknownCall(call_sid.to_string()));
        };
        let root = capture.root_call_sid.clone();

        // Synchronous check before any durable work (see module docs).
        let deferred = self.pending.take(call_sid);

        if !capture.inbound.is_empty() {
            self.append_leg(&root, MediaTrack::Inbound, &capture.inbound).await?;
        }
        if !capture.outbound.is_empty() {
            self.append_leg(&root, MediaTrack::Outbound, &capture.outbound).await?;
        }

        if deferred {
            info!(call = %call_sid, root = %root, "transfer pending, upload deferred");
            return Ok(CloseOutcome::DeferredForTransfer);
        }

        match self.finalize_root(&root).await? {
            Some(uri) => Ok(CloseOutcome::Uploaded(uri)),
            None => Ok(CloseOutcome::Empty),
        }
    }

    /// Mix and upload everything stored under `root`, without a live leg.
    ///
    /// The transfer path calls this when the dial leg finishes: that leg
    /// was recorded natively by the carrier, so the WebSocket never closes
    /// a second time and the deferred buffers are flushed from here.
    /// Returns the archived URI, or `None` when nothing was stored.
    pub async fn finalize_root(&self, root: &str) -> Result<Option<String>> {
        let left = self.combined(root, MediaTrack::Inbound).await?;
        let right = self.combined(root, MediaTrack::Outbound).await?;
        if left.is_empty() && right.is_empty() {
            return Ok(None);
        }
        let wav = mix_stereo_ulaw(&left, &right);
        let key = format!("recordings/{root}.wav");
        match self.archive.put(&key, wav).await {
            Ok(uri) => {
                self.delete_group(root).await?;
                info!(root = %root, uri = %uri, "deferred recording uploaded");
                Ok(Some(uri))
            }
            Err(e) => {
                warn!(root = %root, error = %e, "deferred recording upload failed");
                Err(MediaError::Upload(e))
            }
        }
    }

    async fn append_leg(&self, root: &str, track: MediaTrack, audio: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO captured_legs (root_call_sid, track, data) VALUES (?1, ?2, ?3)",
        )
        .bind(root)
        .bind(track.as_str())
        .bind(audio)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn combined(&self, root: &str, track: MediaTrack) -> Result<Vec<u8>> {
        let rows = sqlx::query(
            "SELECT data FROM captured_legs
             WHERE root_call_sid = ?1 AND track = ?2
             ORDER BY seq ASC",
        )
        .bind(root)
        .bind(track.as_str())
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::new();
        for row in rows {
            out.extend_from_slice(&row.get::<Vec<u8>, _>("data"));
        }
        Ok(out)
    }

    async fn delete_group(&self, root: &str) -> Result<()> {
        sqlx::query("DELETE FROM captured_legs WHERE root_call_sid = ?1")
            .bind(root)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::InMemoryRecordingStore;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pipeline() -> (CapturePipeline, Arc<InMemoryRecordingStore>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = Arc::new(InMemoryRecordingStore::new());
        let pipeline = CapturePipeline::new(
            pool,
            Arc::new(PendingTransferCache::new()),
            store.clone(),
        )
        .await
        .unwrap();
        (pipeline, store)
    }

    #[tokio::test]
    async fn untransferred_call_uploads_once() {
        let (pipeline, store) = pipeline().await;
        pipeline.begin("CA1", "CA1");
        pipeline.append("CA1", MediaTrack::Inbound, &[1, 2, 3]);
        pipeline.append("CA1", MediaTrack::Outbound, &[9, 9]);

        let outcome = pipeline.close("CA1").await.unwrap();
        assert_eq!(
            outcome,
            CloseOutcome::Uploaded("memory://recordings/CA1.wav".into())
        );
        assert_eq!(store.len(), 1);

        let wav = store.object("recordings/CA1.wav").unwrap();
        // Three sample frames, right channel padded.
        assert_eq!(&wav[58..64], &[1, 9, 2, 9, 3, crate::wav::ULAW_SILENCE]);
    }

    #[tokio::test]
    async fn transfer_defers_and_final_leg_combines_audio() {
        let (pipeline, store) = pipeline().await;

        // Leg one: caller talks to the IVR, then asks for a human.
        pipeline.begin("CA1", "CA1");
        pipeline.append("CA1", MediaTrack::Inbound, &[1, 1]);
        pipeline.append("CA1", MediaTrack::Outbound, &[2, 2]);
        pipeline.pending().set("CA1");
        let outcome = pipeline.close("CA1").await.unwrap();
        assert_eq!(outcome, CloseOutcome::DeferredForTransfer);
        assert!(store.is_empty(), "no upload while the transfer is live");

        // Leg two: the representative leg, grouped by the root call id.
        pipeline.begin("CA2", "CA1");
        pipeline.append("CA2", MediaTrack::Inbound, &[3, 3]);
        pipeline.append("CA2", MediaTrack::Outbound, &[4, 4]);
        let outcome = pipeline.close("CA2").await.unwrap();
        assert_eq!(
            outcome,
            CloseOutcome::Uploaded("memory://recordings/CA1.wav".into())
        );

        let wav = store.object("recordings/CA1.wav").unwrap();
        // Both legs' audio in order: left 1,1,3,3 right 2,2,4,4 interleaved.
        assert_eq!(&wav[58..66], &[1, 2, 1, 2, 3, 4, 3, 4]);
    }

    #[tokio::test]
    async fn empty_call_stores_nothing() {
        let (pipeline, store) = pipeline().await;
        pipeline.begin("CA1", "CA1");
        let outcome = pipeline.close("CA1").await.unwrap();
        assert_eq!(outcome, CloseOutcome::Empty);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn closing_unknown_call_errors() {
        let (pipeline, _) = pipeline().await;
        assert!(matches!(
            pipeline.close("CA404").await,
            Err(MediaError::UnknownCall(_))
        ));
    }

    #[tokio::test]
    async fn pending_flag_is_consumed_once() {
        let cache = PendingTransferCache::new();
        cache.set("CA1");
        assert!(cache.is_pending("CA1"));
        assert!(cache.take("CA1"));
        assert!(!cache.take("CA1"));
    }
}
