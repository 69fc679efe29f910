use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Short-lived set of already-accepted message ids.
///
/// Overlapping event sources (live delivery, offline replay, resumed
/// sessions) can report the same message more than once; this cache answers
/// "first time seen?" atomically. Entries expire after a fixed window so
/// memory stays bounded, trading a small risk of re-accepting a very late
/// duplicate. Expiry is enforced by a periodic sweep rather than per-entry
/// timers.
pub struct DedupCache {
    seen: DashMap<String, Instant>,
    window: Duration,
    sweep_interval: Duration,
}

impl DedupCache {
    pub fn new(window: Duration, sweep_interval: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            window,
            sweep_interval,
        }
    }

    /// Atomic check-and-set. Returns `true` exactly once per id within the
    /// expiry window; an id whose record has expired is accepted again.
    pub fn try_accept(&self, id: &str) -> bool {
        let now = Instant::now();
        match self.seen.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if now.duration_since(*occupied.get()) >= self.window {
                    occupied.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Drops every record older than the expiry window.
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.seen.len();
        self.seen
            .retain(|_, accepted_at| now.duration_since(*accepted_at) < self.window);
        let dropped = before.saturating_sub(self.seen.len());
        if dropped > 0 {
            debug!(target: "Bridge/Dedup", "swept {dropped} expired message ids");
        }
    }

    /// Background sweep loop. Spawn once at startup.
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            self.sweep();
        }
    }
}
