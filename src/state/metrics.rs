use crate::event::DecodeError;
use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Sliding window for the apply rate, in milliseconds
const RATE_WINDOW_MS: i64 = 5000;

/// Tracks pipeline counters for diagnostics
#[derive(Clone)]
pub struct SyncMetrics {
    /// Raw frames delivered by the transport
    frames_received: Arc<AtomicU64>,

    /// Events that changed the snapshot
    events_applied: Arc<AtomicU64>,

    /// Events rejected by the arrival-index rule
    stale_events: Arc<AtomicU64>,

    /// Decode failures, by class
    unknown_type: Arc<AtomicU64>,
    malformed: Arc<AtomicU64>,

    /// Transport lifecycle
    reconnects: Arc<AtomicU64>,
    resyncs: Arc<AtomicU64>,

    /// Entities removed by the staleness sweep
    expired: Arc<AtomicU64>,

    /// Apply timestamps for rate calculation (sliding 5-second window)
    apply_timestamps: Arc<RwLock<VecDeque<i64>>>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: Arc::new(AtomicU64::new(0)),
            events_applied: Arc::new(AtomicU64::new(0)),
            stale_events: Arc::new(AtomicU64::new(0)),
            unknown_type: Arc::new(AtomicU64::new(0)),
            malformed: Arc::new(AtomicU64::new(0)),
            reconnects: Arc::new(AtomicU64::new(0)),
            resyncs: Arc::new(AtomicU64::new(0)),
            expired: Arc::new(AtomicU64::new(0)),
            apply_timestamps: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied(&self) {
        self.record_applied_at(Utc::now().timestamp_millis());
    }

    pub(crate) fn record_applied_at(&self, now_ms: i64) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);

        let mut timestamps = self
            .apply_timestamps
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        timestamps.push_back(now_ms);
        prune_window(&mut timestamps, now_ms);
    }

    pub fn record_stale(&self) {
        self.stale_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self, error: &DecodeError) {
        match error {
            DecodeError::UnknownType(_) => self.unknown_type.fetch_add(1, Ordering::Relaxed),
            DecodeError::Malformed(_) => self.malformed.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self, count: usize) {
        self.expired.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Applied events per second over the last 5 seconds
    pub fn apply_rate(&self) -> f64 {
        self.apply_rate_at(Utc::now().timestamp_millis())
    }

    /// Rate as seen at `now_ms`; entries older than the window are pruned
    /// so an idle stream reads as zero.
    pub(crate) fn apply_rate_at(&self, now_ms: i64) -> f64 {
        let mut timestamps = self
            .apply_timestamps
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        prune_window(&mut timestamps, now_ms);
        timestamps.len() as f64 / (RATE_WINDOW_MS as f64 / 1000.0)
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied.load(Ordering::Relaxed)
    }

    pub fn stale_events(&self) -> u64 {
        self.stale_events.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            events_applied: self.events_applied(),
            stale_events: self.stale_events(),
            unknown_type_errors: self.unknown_type.load(Ordering::Relaxed),
            malformed_errors: self.malformed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            apply_rate: self.apply_rate(),
        }
    }
}

fn prune_window(timestamps: &mut VecDeque<i64>, now_ms: i64) {
    while let Some(&oldest) = timestamps.front() {
        if now_ms - oldest > RATE_WINDOW_MS {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub events_applied: u64,
    pub stale_events: u64,
    pub unknown_type_errors: u64,
    pub malformed_errors: u64,
    pub reconnects: u64,
    pub resyncs: u64,
    pub expired: u64,
    pub apply_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counters() {
        let metrics = SyncMetrics::new();

        metrics.record_frame();
        metrics.record_frame();
        metrics.record_applied();
        metrics.record_stale();
        metrics.record_decode_error(&DecodeError::UnknownType("x".into()));
        metrics.record_decode_error(&DecodeError::Malformed("y".into()));
        metrics.record_decode_error(&DecodeError::Malformed("z".into()));
        metrics.record_reconnect();
        metrics.record_resync();
        metrics.record_expired(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.events_applied, 1);
        assert_eq!(snap.stale_events, 1);
        assert_eq!(snap.unknown_type_errors, 1);
        assert_eq!(snap.malformed_errors, 2);
        assert_eq!(snap.reconnects, 1);
        assert_eq!(snap.resyncs, 1);
        assert_eq!(snap.expired, 3);
    }

    #[test]
    fn test_apply_rate_calculation() {
        let metrics = SyncMetrics::new();

        for _ in 0..10 {
            metrics.record_applied_at(1_000_000);
        }

        // 10 events / 5s
        assert_eq!(metrics.apply_rate_at(1_000_000), 2.0);
    }

    #[test]
    fn test_sliding_window_cleanup() {
        let metrics = SyncMetrics::new();

        metrics.record_applied_at(1_000_000);
        metrics.record_applied_at(1_000_000 + 6_000);

        // First timestamp pruned, lifetime counter untouched
        assert_eq!(metrics.apply_rate_at(1_000_000 + 6_000), 0.2);
        assert_eq!(metrics.events_applied(), 2);
    }

    #[test]
    fn test_rate_drops_to_zero_when_idle() {
        let metrics = SyncMetrics::new();
        let now = Utc::now().timestamp_millis();

        for _ in 0..50 {
            metrics.record_applied_at(now - 60_000);
        }

        assert_eq!(metrics.apply_rate(), 0.0);
        assert_eq!(metrics.snapshot().apply_rate, 0.0);
        assert_eq!(metrics.events_applied(), 50);
    }

    #[test]
    fn test_rate_window_expires_without_new_applies() {
        let metrics = SyncMetrics::new();

        for _ in 0..10 {
            metrics.record_applied_at(1_000_000);
        }

        assert_eq!(metrics.apply_rate_at(1_000_000 + 5_000), 2.0);
        assert_eq!(metrics.apply_rate_at(1_000_000 + 5_001), 0.0);
    }

    #[test]
    fn test_concurrent_access() {
        let metrics = Arc::new(SyncMetrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let metrics_clone = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    metrics_clone.record_frame();
                    metrics_clone.record_stale();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.frames_received, 1000);
        assert_eq!(snap.stale_events, 1000);
    }
}
