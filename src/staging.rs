use bytes::Bytes;
use dashmap::DashMap;
use log::debug;
use rand::RngCore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct StagedMedia {
    data: Bytes,
    mime: String,
    created_at: Instant,
}

/// Staging totals for the /status endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingStats {
    pub entries: usize,
    pub bytes: usize,
}

/// Transient store for binary media blobs, keyed by an opaque generated id.
///
/// Entries older than the retention window are deleted by a periodic sweep.
/// `get` hands out a reference-counted clone of the payload, so a reader
/// that obtained the bytes keeps them valid even if the sweep evicts the
/// entry immediately afterward.
pub struct StagingStore {
    entries: DashMap<String, StagedMedia>,
    retention: Duration,
    sweep_interval: Duration,
}

impl StagingStore {
    pub fn new(retention: Duration, sweep_interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
            sweep_interval,
        }
    }

    /// Stages a blob and returns its id.
    pub fn put(&self, data: Bytes, mime: impl Into<String>) -> String {
        let mut raw = [0u8; 16];
        rand::rng().fill_bytes(&mut raw);
        let id = hex::encode(raw);
        self.entries.insert(
            id.clone(),
            StagedMedia {
                data,
                mime: mime.into(),
                created_at: Instant::now(),
            },
        );
        id
    }

    /// Payload and MIME type, or `None` once the entry has been evicted.
    pub fn get(&self, id: &str) -> Option<(Bytes, String)> {
        self.entries
            .get(id)
            .map(|entry| (entry.data.clone(), entry.mime.clone()))
    }

    pub fn stats(&self) -> StagingStats {
        let mut stats = StagingStats::default();
        for entry in self.entries.iter() {
            stats.entries += 1;
            stats.bytes += entry.data.len();
        }
        stats
    }

    /// Deletes every entry older than the retention window.
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.duration_since(entry.created_at) < self.retention);
        let dropped = before.saturating_sub(self.entries.len());
        if dropped > 0 {
            debug!(target: "Bridge/Staging", "evicted {dropped} staged media entries");
        }
    }

    /// Background eviction loop. Spawn once at startup.
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            self.sweep();
        }
    }
}
