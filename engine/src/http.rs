//! Thin HTTP fetch wrapper. Performs the `GET` and the MIME check, and
//! turns whatever went wrong into a `FetchFailure` for `retry` to classify.
//! Holds no retry or rate-limit policy itself — those are the retry
//! controller's and rate limiter's jobs respectively (§4.7, §4.8).

use std::time::Duration;
use tile_download_shared::TileErrorKind;
use tokio_util::sync::CancellationToken;

pub const PER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub kind: TileErrorKind,
    pub http_status: Option<u16>,
    pub message: String,
}

/// What one fetch attempt produced, plus any `Retry-After` hint the server
/// gave regardless of outcome (the retry controller decides what to do
/// with it).
pub struct FetchAttempt {
    pub result: Result<Vec<u8>, FetchFailure>,
    pub retry_after: Option<Duration>,
}

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_user_agent(None)
    }

    pub fn with_user_agent(user_agent: Option<&str>) -> anyhow::Result<Self> {
        let default_ua = format!("tile-download-engine/{}", env!("CARGO_PKG_VERSION"));
        let client = reqwest::Client::builder()
            .user_agent(user_agent.unwrap_or(&default_ua).to_string())
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetches one tile: a `GET`, a 10 s wall-clock timeout composed with
    /// `cancel`, and a post-body MIME check.
    pub async fn fetch_tile(&self, url: &str, cancel: &CancellationToken) -> FetchAttempt {
        let request = self.client.get(url).send();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return FetchAttempt {
                    result: Err(FetchFailure {
                        kind: TileErrorKind::Cancelled,
                        http_status: None,
                        message: "cancelled".to_string(),
                    }),
                    retry_after: None,
                };
            }
            timed = tokio::time::timeout(PER_REQUEST_TIMEOUT, request) => timed,
        };

        let response = match outcome {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                let kind = if e.is_timeout() {
                    TileErrorKind::Timeout
                } else {
                    TileErrorKind::Network
                };
                return FetchAttempt {
                    result: Err(FetchFailure {
                        kind,
                        http_status: e.status().map(|s| s.as_u16()),
                        message: e.to_string(),
                    }),
                    retry_after: None,
                };
            }
            Err(_elapsed) => {
                return FetchAttempt {
                    result: Err(FetchFailure {
                        kind: TileErrorKind::Timeout,
                        http_status: None,
                        message: format!("request exceeded {PER_REQUEST_TIMEOUT:?} timeout"),
                    }),
                    retry_after: None,
                };
            }
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        if !status.is_success() {
            return FetchAttempt {
                result: Err(FetchFailure {
                    kind: TileErrorKind::Http,
                    http_status: Some(status.as_u16()),
                    message: format!("unexpected status {status}"),
                }),
                retry_after,
            };
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return FetchAttempt {
                    result: Err(FetchFailure {
                        kind: TileErrorKind::Network,
                        http_status: None,
                        message: e.to_string(),
                    }),
                    retry_after,
                };
            }
        };

        // The MIME check happens after the body materializes (§5's
        // suspension-point list calls this out explicitly).
        if !content_type.as_deref().map(|ct| ct.starts_with("image/")).unwrap_or(false) {
            return FetchAttempt {
                result: Err(FetchFailure {
                    kind: TileErrorKind::Parse,
                    http_status: Some(status.as_u16()),
                    message: format!("expected an image/* content-type, got {content_type:?}"),
                }),
                retry_after,
            };
        }

        FetchAttempt {
            result: Ok(bytes.to_vec()),
            retry_after,
        }
    }
}
