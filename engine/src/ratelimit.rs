//! Rate limiter (C7): minimum-interval token pacing.
//!
//! `acquire()` must be called from *inside* each fetch task, never from the
//! scheduler's dispatch loop — see the module-level note on `Scheduler` for
//! why. Fairness is FIFO by construction: `tokio::sync::Mutex` queues
//! waiters in arrival order, and this is the only state `acquire()` touches.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RateLimiter {
    interval: Option<Duration>,
    last_acquired: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// `rate_per_sec = None` means unlimited: `acquire()` never waits.
    pub fn new(rate_per_sec: Option<f64>) -> Self {
        let interval = rate_per_sec.filter(|r| *r > 0.0).map(|r| Duration::from_secs_f64(1.0 / r));
        Self {
            interval,
            last_acquired: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let Some(interval) = self.interval else {
            return;
        };

        let mut last = self.last_acquired.lock().await;
        let now = Instant::now();
        let earliest_allowed = last.map(|t| t + interval);

        if let Some(earliest) = earliest_allowed {
            if earliest > now {
                tokio::time::sleep_until(earliest).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn unlimited_never_waits() {
        let limiter = RateLimiter::new(None);
        let start = std::time::Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_of_one_spaces_three_acquires_by_two_seconds() {
        let limiter = Arc::new(RateLimiter::new(Some(1.0)));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(Instant::now() - start >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_serialize_to_the_interval() {
        let limiter = Arc::new(RateLimiter::new(Some(10.0))); // 100ms apart
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(Instant::now() - start >= Duration::from_millis(300));
    }
}
