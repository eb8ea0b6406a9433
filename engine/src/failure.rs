//! Failure monitor (C11): the circuit breaker. Records the outcome of each
//! *post-retry* attempt (a tile retried then succeeded still counts as one
//! attempted, zero failed — see DESIGN.md's Open Question policy) and trips
//! once at least 10 attempts have been observed and more than a quarter of
//! them failed.

use std::sync::atomic::{AtomicU64, Ordering};

const MIN_SAMPLES: u64 = 10;
const FAILURE_RATIO_THRESHOLD: f64 = 0.25;

#[derive(Default)]
pub struct FailureMonitor {
    attempted: AtomicU64,
    failed: AtomicU64,
}

impl FailureMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, succeeded: bool) {
        self.attempted.fetch_add(1, Ordering::SeqCst);
        if !succeeded {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn should_abort(&self) -> bool {
        let attempted = self.attempted.load(Ordering::SeqCst);
        if attempted < MIN_SAMPLES {
            return false;
        }
        let failed = self.failed.load(Ordering::SeqCst);
        (failed as f64 / attempted as f64) > FAILURE_RATIO_THRESHOLD
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn attempted_count(&self) -> u64 {
        self.attempted.load(Ordering::SeqCst)
    }
}
