//! The dispatch loop (C9): drains the enumerated tile queue with bounded
//! concurrency, drives each tile through the rate limiter and retry
//! controller, and folds outcomes into progress/failure tracking. Owns the
//! pause/resume/cancel state machine (spec.md §4.9).

use crate::error::FailureThresholdExceeded;
use crate::failure::FailureMonitor;
use crate::http::HttpClient;
use crate::progress::ProgressTracker;
use crate::ratelimit::RateLimiter;
use crate::retry::{self, RetryPolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tile_download_shared::{DownloadState, DownloadStats, TileCoordinate, TileError, TileKey, TilePayload};
use tokio::sync::{mpsc, oneshot, Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub type StatsResult = Result<DownloadStats, FailureThresholdExceeded>;

pub struct SchedulerOutput {
    pub tiles_rx: mpsc::Receiver<TilePayload>,
    pub stats_rx: oneshot::Receiver<StatsResult>,
}

/// Pause/resume gate using the check-notified-check-await idiom: a
/// `Notified` future records its interest the moment it's created, so a
/// `resume()` racing a task on the verge of waiting is never missed.
struct PauseGate {
    paused: AtomicBool,
    notify: Notify,
}

impl PauseGate {
    fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        if !paused {
            self.notify.notify_waiters();
        }
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn wait_while_paused(&self) {
        loop {
            if !self.paused.load(Ordering::SeqCst) {
                return;
            }
            let notified = self.notify.notified();
            if !self.paused.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

pub struct Scheduler {
    cancel: CancellationToken,
    pause_gate: PauseGate,
    progress: Arc<ProgressTracker>,
}

impl Scheduler {
    pub fn new(progress: Arc<ProgressTracker>) -> Arc<Self> {
        Arc::new(Self {
            cancel: CancellationToken::new(),
            pause_gate: PauseGate::new(),
            progress,
        })
    }

    /// Rejects the call unless the run is actively downloading — pausing
    /// during estimation or before the first tile dispatches is a no-op
    /// (see DESIGN.md's note on this Open Question).
    pub fn pause(&self) {
        if self.progress.state() == DownloadState::Downloading {
            self.pause_gate.set_paused(true);
            self.progress.set_state(DownloadState::Paused);
        }
    }

    pub fn resume(&self) {
        if self.pause_gate.is_paused() {
            self.pause_gate.set_paused(false);
            self.progress.set_state(DownloadState::Downloading);
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        // Wake anything parked on the pause gate so it observes cancellation
        // promptly instead of waiting for a resume that may never come.
        self.pause_gate.set_paused(false);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawns the background dispatch task and returns the channels the
    /// facade exposes to callers. `coordinates` must already be deduped and
    /// ordered; this method does not reorder them.
    pub fn run(
        self: Arc<Self>,
        coordinates: Vec<TileCoordinate>,
        client: HttpClient,
        rate_limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
        failure_monitor: Arc<FailureMonitor>,
        concurrency: usize,
    ) -> SchedulerOutput {
        let (tiles_tx, tiles_rx) = mpsc::channel(64);
        let (stats_tx, stats_rx) = oneshot::channel();
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let errors = Arc::new(StdMutex::new(Vec::<TileError>::new()));
        let failed_tiles = Arc::new(StdMutex::new(Vec::<TileKey>::new()));

        self.progress.set_state(DownloadState::Downloading);
        let started_at = tokio::time::Instant::now();

        tokio::spawn(async move {
            let mut join_set: JoinSet<()> = JoinSet::new();

            for coord in coordinates {
                if self.cancel.is_cancelled() {
                    break;
                }
                self.pause_gate.wait_while_paused().await;
                if self.cancel.is_cancelled() {
                    break;
                }

                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                self.progress.record_dispatch();

                let client = client.clone();
                let rate_limiter = rate_limiter.clone();
                let cancel = self.cancel.clone();
                let progress = self.progress.clone();
                let failure_monitor = failure_monitor.clone();
                let tiles_tx = tiles_tx.clone();
                let errors = errors.clone();
                let failed_tiles = failed_tiles.clone();

                join_set.spawn(async move {
                    let _permit = permit;
                    let tile_key = coord.key();

                    let retry_progress = progress.clone();
                    let outcome = retry::execute(
                        retry_policy,
                        &tile_key,
                        &cancel,
                        now_ms,
                        move || retry_progress.record_retry_started(),
                        || {
                            let client = client.clone();
                            let rate_limiter = rate_limiter.clone();
                            let cancel = cancel.clone();
                            let url = coord.url.clone();
                            async move {
                                rate_limiter.acquire().await;
                                client.fetch_tile(&url, &cancel).await
                            }
                        },
                    )
                    .await;

                    let was_retrying = outcome.attempts > 1;
                    match outcome.bytes {
                        Ok(bytes) => {
                            progress.record_success(bytes.len() as u64, was_retrying);
                            failure_monitor.record(true);
                            let payload = TilePayload {
                                service_name: coord.service_name,
                                z: coord.z,
                                x: coord.x,
                                y: coord.y,
                                bytes,
                            };
                            let _ = tiles_tx.send(payload).await;
                        }
                        Err(err) => {
                            progress.record_failure(was_retrying);
                            failure_monitor.record(false);
                            failed_tiles.lock().unwrap().push(tile_key);
                            errors.lock().unwrap().push(err);
                        }
                    }

                    if failure_monitor.should_abort() {
                        cancel.cancel();
                    }
                });
            }

            while join_set.join_next().await.is_some() {}

            let final_state = if self.cancel.is_cancelled() {
                if failure_monitor.should_abort() {
                    DownloadState::Failed
                } else {
                    DownloadState::Cancelled
                }
            } else {
                DownloadState::Completed
            };
            self.progress.set_state(final_state);

            let snapshot = self.progress.snapshot();
            let elapsed_ms = started_at.elapsed().as_millis() as u64;
            let average_speed_bps = if elapsed_ms > 0 {
                snapshot.downloaded_bytes as f64 / (elapsed_ms as f64 / 1000.0)
            } else {
                0.0
            };
            let total_attempted = snapshot.downloaded + snapshot.failed;
            let success_ratio = if total_attempted > 0 {
                snapshot.downloaded as f64 / total_attempted as f64
            } else {
                1.0
            };

            let stats = DownloadStats {
                successful: snapshot.downloaded,
                failed: snapshot.failed,
                success_ratio,
                actual_size_bytes: snapshot.downloaded_bytes,
                elapsed_ms,
                average_speed_bps,
                requests_issued: self.progress.requests_issued(),
                errors: errors.lock().unwrap().clone(),
                failed_tiles: failed_tiles.lock().unwrap().clone(),
            };

            // S5: a run that ends `failed` raises through the stats future
            // instead of resolving to a plain `DownloadStats`.
            let result = if final_state == DownloadState::Failed {
                Err(FailureThresholdExceeded {
                    failed: failure_monitor.failed_count(),
                    attempted: failure_monitor.attempted_count(),
                })
            } else {
                Ok(stats)
            };
            let _ = stats_tx.send(result);
        });

        SchedulerOutput { tiles_rx, stats_rx }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_is_a_no_op_before_downloading_starts() {
        let progress = Arc::new(ProgressTracker::new(10, 1000));
        let scheduler = Scheduler::new(progress.clone());
        scheduler.pause();
        assert_eq!(progress.state(), DownloadState::Idle);
    }

    #[tokio::test]
    async fn cancel_wakes_a_paused_run() {
        let progress = Arc::new(ProgressTracker::new(10, 1000));
        progress.set_state(DownloadState::Downloading);
        let scheduler = Scheduler::new(progress.clone());
        scheduler.pause();
        assert_eq!(progress.state(), DownloadState::Paused);

        let gate_scheduler = scheduler.clone();
        let waited = tokio::spawn(async move {
            gate_scheduler.pause_gate.wait_while_paused().await;
        });

        scheduler.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), waited)
            .await
            .expect("cancel must wake a parked pause wait")
            .unwrap();
    }
}
