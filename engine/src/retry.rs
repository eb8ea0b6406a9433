//! Retry controller (C8): runs a fetch, classifies the outcome, and either
//! retries with exponential backoff or returns.

use crate::http::FetchFailure;
use std::future::Future;
use std::time::Duration;
use tile_download_shared::{TileError, TileErrorKind, TileKey};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        1 + self.retries
    }
}

pub struct RetryOutcome {
    pub bytes: Result<Vec<u8>, TileError>,
    pub attempts: u32,
}

/// Classifies a failure per the table in `spec.md` §4.8. `kind` is mostly
/// decided already at the HTTP layer; this only resolves the ambiguous
/// `Http` case by status code, and the catch-all `Unknown` fallback.
fn classify(failure: &FetchFailure) -> (TileErrorKind, bool) {
    match failure.kind {
        TileErrorKind::Network => (TileErrorKind::Network, true),
        TileErrorKind::Timeout => (TileErrorKind::Timeout, true),
        TileErrorKind::Cors => (TileErrorKind::Cors, false),
        TileErrorKind::Parse => (TileErrorKind::Parse, false),
        TileErrorKind::Cancelled => (TileErrorKind::Cancelled, false),
        TileErrorKind::Http => {
            let retryable = match failure.http_status {
                Some(400 | 401 | 403 | 404 | 410) => false,
                Some(429 | 500 | 502 | 503 | 504) => true,
                _ => true, // unrecognized status: treat like Unknown, retry
            };
            (TileErrorKind::Http, retryable)
        }
        TileErrorKind::Unknown => (TileErrorKind::Unknown, true),
    }
}

/// Runs `fetch` up to `policy.max_attempts()` times. `fetch` is re-invoked
/// by the caller's closure each attempt — it must issue a fresh request
/// (the rate limiter is acquired *inside* that closure, per §4.7's hard
/// placement contract, not here). `on_retry` fires once a failed attempt is
/// about to be retried, before the backoff sleep — callers use it to mark
/// the tile as currently retrying in progress tracking.
pub async fn execute<F, Fut>(
    policy: RetryPolicy,
    tile: &TileKey,
    cancel: &CancellationToken,
    now_ms: impl Fn() -> u64,
    on_retry: impl Fn(),
    mut fetch: F,
) -> RetryOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::http::FetchAttempt>,
{
    let mut attempts: u32 = 0;
    let max_attempts = policy.max_attempts();

    loop {
        attempts += 1;
        let attempt = fetch().await;

        match attempt.result {
            Ok(bytes) => {
                return RetryOutcome {
                    bytes: Ok(bytes),
                    attempts,
                };
            }
            Err(failure) => {
                let (kind, retryable) = classify(&failure);
                let exhausted = attempts >= max_attempts;

                if !retryable || exhausted {
                    return RetryOutcome {
                        bytes: Err(TileError {
                            tile: tile.clone(),
                            kind,
                            http_status: failure.http_status,
                            message: failure.message,
                            attempts,
                            timestamp_ms: now_ms(),
                            retryable,
                        }),
                        attempts,
                    };
                }

                on_retry();

                // k is 0-indexed: attempts=1 was the initial try, so the
                // first retry is k=0.
                let k = attempts - 1;
                let computed = Duration::from_millis(policy.base_delay_ms.saturating_mul(1u64 << k.min(20)));
                let delay = attempt.retry_after.map(|ra| ra.max(computed)).unwrap_or(computed);

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return RetryOutcome {
                            bytes: Err(TileError {
                                tile: tile.clone(),
                                kind: TileErrorKind::Cancelled,
                                http_status: None,
                                message: "cancelled during retry backoff".to_string(),
                                attempts,
                                timestamp_ms: now_ms(),
                                retryable: false,
                            }),
                            attempts,
                        };
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
