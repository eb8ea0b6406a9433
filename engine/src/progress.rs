//! Progress tracker (C10): counters plus a smoothed byte-rate and ETA.
//! Snapshots are read-only copies — no callback fan-out, callers poll.

use std::sync::Mutex;
use tile_download_shared::{DownloadState, LiveProgress};
use tokio::time::{Duration, Instant};

const SPEED_WINDOW: Duration = Duration::from_millis(500);

struct Inner {
    state: DownloadState,
    downloaded: u64,
    failed: u64,
    pending: u64,
    retrying: u64,
    total: u64,
    downloaded_bytes: u64,
    estimated_bytes: u64,
    requests_issued: u64,
    current_speed_bps: f64,
    bytes_since_window: u64,
    window_start: Instant,
}

pub struct ProgressTracker {
    inner: Mutex<Inner>,
}

impl ProgressTracker {
    pub fn new(total: u64, estimated_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: DownloadState::Idle,
                downloaded: 0,
                failed: 0,
                pending: total,
                retrying: 0,
                total,
                downloaded_bytes: 0,
                estimated_bytes,
                requests_issued: 0,
                current_speed_bps: 0.0,
                bytes_since_window: 0,
                window_start: Instant::now(),
            }),
        }
    }

    pub fn set_state(&self, state: DownloadState) {
        self.inner.lock().unwrap().state = state;
    }

    pub fn state(&self) -> DownloadState {
        self.inner.lock().unwrap().state
    }

    pub fn set_estimated_bytes(&self, estimated_bytes: u64) {
        self.inner.lock().unwrap().estimated_bytes = estimated_bytes;
    }

    /// A coordinate left the queue and a task started for it. Still counted
    /// under `pending` until it either needs a retry or settles — `pending`
    /// means "hasn't needed a retry yet", not "hasn't started".
    pub fn record_dispatch(&self) {
        self.inner.lock().unwrap().requests_issued += 1;
    }

    pub fn record_request_attempt(&self) {
        self.inner.lock().unwrap().requests_issued += 1;
    }

    /// A fetch attempt failed but will be retried: moves the tile from
    /// `pending` into `retrying` for as long as the retry is in flight.
    pub fn record_retry_started(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending = inner.pending.saturating_sub(1);
        inner.retrying += 1;
    }

    pub fn record_success(&self, byte_len: u64, was_retrying: bool) {
        let mut inner = self.inner.lock().unwrap();
        if was_retrying {
            inner.retrying = inner.retrying.saturating_sub(1);
        } else {
            inner.pending = inner.pending.saturating_sub(1);
        }
        inner.downloaded += 1;
        inner.downloaded_bytes += byte_len;
        inner.bytes_since_window += byte_len;
    }

    pub fn record_failure(&self, was_retrying: bool) {
        let mut inner = self.inner.lock().unwrap();
        if was_retrying {
            inner.retrying = inner.retrying.saturating_sub(1);
        } else {
            inner.pending = inner.pending.saturating_sub(1);
        }
        inner.failed += 1;
    }

    pub fn requests_issued(&self) -> u64 {
        self.inner.lock().unwrap().requests_issued
    }

    pub fn snapshot(&self) -> LiveProgress {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let elapsed = now.duration_since(inner.window_start);

        if elapsed >= SPEED_WINDOW {
            let secs = elapsed.as_secs_f64();
            inner.current_speed_bps = if secs > 0.0 {
                inner.bytes_since_window as f64 / secs
            } else {
                0.0
            };
            inner.bytes_since_window = 0;
            inner.window_start = now;
        }

        let eta_seconds = if inner.current_speed_bps > 0.0 {
            ((inner.estimated_bytes.saturating_sub(inner.downloaded_bytes)) as f64) / inner.current_speed_bps
        } else {
            0.0
        };

        let percent_complete = if inner.total == 0 {
            1.0
        } else {
            ((inner.downloaded + inner.failed) as f64 / inner.total as f64).clamp(0.0, 1.0)
        };

        LiveProgress {
            state: inner.state,
            downloaded: inner.downloaded,
            failed: inner.failed,
            pending: inner.pending,
            retrying: inner.retrying,
            total: inner.total,
            downloaded_bytes: inner.downloaded_bytes,
            estimated_bytes: inner.estimated_bytes,
            percent_complete,
            current_speed_bps: inner.current_speed_bps,
            eta_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_counts_always_sum_to_total() {
        let tracker = ProgressTracker::new(10, 1000);
        for _ in 0..4 {
            tracker.record_dispatch();
        }
        tracker.record_success(100, false);
        tracker.record_failure(false);
        let snap = tracker.snapshot();
        assert_eq!(snap.downloaded + snap.failed + snap.pending + snap.retrying, snap.total);
    }

    #[test]
    fn a_tile_on_its_first_attempt_is_not_reported_as_retrying() {
        let tracker = ProgressTracker::new(5, 1000);
        for _ in 0..3 {
            tracker.record_dispatch();
        }
        let snap = tracker.snapshot();
        assert_eq!(snap.retrying, 0);
        assert_eq!(snap.pending, 5);
    }

    #[test]
    fn a_retried_tile_moves_from_pending_to_retrying_and_back() {
        let tracker = ProgressTracker::new(3, 1000);
        tracker.record_dispatch();
        tracker.record_retry_started();
        let mid = tracker.snapshot();
        assert_eq!(mid.retrying, 1);
        assert_eq!(mid.pending, 2);

        tracker.record_success(10, true);
        let snap = tracker.snapshot();
        assert_eq!(snap.retrying, 0);
        assert_eq!(snap.downloaded, 1);
        assert_eq!(snap.downloaded + snap.failed + snap.pending + snap.retrying, snap.total);
    }

    #[test]
    fn downloaded_bytes_non_decreasing() {
        let tracker = ProgressTracker::new(2, 1000);
        tracker.record_dispatch();
        tracker.record_success(50, false);
        let first = tracker.snapshot().downloaded_bytes;
        tracker.record_dispatch();
        tracker.record_success(25, false);
        let second = tracker.snapshot().downloaded_bytes;
        assert!(second >= first);
    }

    #[test]
    fn zero_total_is_fully_complete() {
        let tracker = ProgressTracker::new(0, 0);
        assert_eq!(tracker.snapshot().percent_complete, 1.0);
    }
}
