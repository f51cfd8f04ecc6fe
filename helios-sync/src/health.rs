use crate::models::ConnectionStatus;
use crate::store::{Freshness, ReconciledStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Rapport de santé de la couche sync (exposé à la console et aux tests)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHealth {
    pub uptime_seconds: u64,
    pub connection_status: ConnectionStatus,
    pub reconnects: u32,
    pub frames_applied: u64,
    pub frames_stale: u64,
    pub frames_dropped: u64,
    pub polls_ok: u64,
    pub polls_failed: u64,
    pub snapshot_age_seconds: Option<i64>,
    pub snapshot_stale: bool,
}

#[derive(Clone)]
pub struct SyncHealthTracker {
    start_time: Instant,
    reconnects: Arc<AtomicU32>,
    frames_applied: Arc<AtomicU64>,
    frames_stale: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
    polls_ok: Arc<AtomicU64>,
    polls_failed: Arc<AtomicU64>,
}

impl SyncHealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            reconnects: Arc::new(AtomicU32::new(0)),
            frames_applied: Arc::new(AtomicU64::new(0)),
            frames_stale: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            polls_ok: Arc::new(AtomicU64::new(0)),
            polls_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_applied(&self) {
        self.frames_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_stale(&self) {
        self.frames_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn poll_succeeded(&self) {
        self.polls_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn poll_failed(&self) {
        self.polls_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, store: &ReconciledStore, stale_after: Duration) -> SyncHealth {
        let view = store.view();
        let now = Utc::now();
        let snapshot_age_seconds = view
            .site
            .health_updated_at
            .map(|t| (now - t).num_seconds().max(0));

        SyncHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            connection_status: store.connection_status(),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            frames_applied: self.frames_applied.load(Ordering::Relaxed),
            frames_stale: self.frames_stale.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            polls_ok: self.polls_ok.load(Ordering::Relaxed),
            polls_failed: self.polls_failed.load(Ordering::Relaxed),
            snapshot_age_seconds,
            snapshot_stale: view.health_freshness(now, stale_after) == Freshness::Stale,
        }
    }
}

impl Default for SyncHealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::watch;

    #[test]
    fn test_counters_are_shared_between_clones() {
        let tracker = SyncHealthTracker::new();
        let clone = tracker.clone();
        clone.frame_applied();
        clone.frame_dropped();
        tracker.poll_failed();
        tracker.increment_reconnects();

        let (_tx, rx) = watch::channel(ConnectionStatus::Connected);
        let store = ReconciledStore::new(rx, false);
        let health = tracker.get_health(&store, Duration::from_secs(180));
        assert_eq!(health.frames_applied, 1);
        assert_eq!(health.frames_dropped, 1);
        assert_eq!(health.polls_failed, 1);
        assert_eq!(health.reconnects, 1);
        assert_eq!(health.connection_status, ConnectionStatus::Connected);
        assert!(health.snapshot_age_seconds.is_none());
        assert!(!health.snapshot_stale);
    }
}
