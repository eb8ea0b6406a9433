//! Public facade (C12): `download_tiles` plus the two standalone helpers
//! documented in spec.md §6. This is the crate's only public entry point —
//! every other module is `pub(crate)` in spirit even where visibility is
//! wider for testing.

use crate::capabilities::{self, CapabilitiesResult};
use crate::config::DownloadConfig;
use crate::dedup;
use crate::enumerate;
use crate::error::ConfigError;
use crate::estimate;
use crate::failure::FailureMonitor;
use crate::grid;
use crate::http::HttpClient;
use crate::progress::ProgressTracker;
use crate::ratelimit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::scheduler::{Scheduler, StatsResult};
use crate::template::{self, SubdomainRotator, TemplateValidation};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tile_download_shared::{DownloadStats, LiveProgress, TilePayload};
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to construct HTTP client: {0}")]
    Client(anyhow::Error),
}

pub struct DownloadHandle {
    scheduler: Arc<Scheduler>,
    progress: Arc<ProgressTracker>,
    total_tiles: u64,
    estimated_size: u64,
    tiles_by_zoom: HashMap<u32, u64>,
    tiles_rx: mpsc::Receiver<TilePayload>,
    stats_rx: Option<oneshot::Receiver<StatsResult>>,
}

impl DownloadHandle {
    pub fn total_tiles(&self) -> u64 {
        self.total_tiles
    }

    pub fn estimated_size(&self) -> u64 {
        self.estimated_size
    }

    pub fn tiles_by_zoom(&self) -> &HashMap<u32, u64> {
        &self.tiles_by_zoom
    }

    pub fn progress(&self) -> LiveProgress {
        self.progress.snapshot()
    }

    pub fn pause(&self) {
        self.scheduler.pause();
    }

    pub fn resume(&self) {
        self.scheduler.resume();
    }

    pub fn cancel(&self) {
        self.scheduler.cancel();
    }

    /// Pulls the next fetched tile. Resolves to `None` once the run is
    /// terminal and every already-decoded payload has been yielded.
    pub async fn next_tile(&mut self) -> Option<TilePayload> {
        self.tiles_rx.recv().await
    }

    /// Resolves once the run reaches a terminal state. `Err` only when the
    /// run ended `failed` — the failure monitor's circuit breaker tripped
    /// mid-run (S5). Callable once; a second call after the first resolves
    /// immediately with a zeroed record.
    pub async fn stats(&mut self) -> StatsResult {
        match self.stats_rx.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| Ok(empty_stats())),
            None => Ok(empty_stats()),
        }
    }
}

/// A cheap, cloneable handle to a running download's control surface
/// (pause/resume/cancel/progress) without the exclusive tile/stats
/// channels `DownloadHandle` owns. Meant for callers — like the worker
/// wrapper — that need to route commands to a download from outside the
/// task draining its tile stream.
#[derive(Clone)]
pub struct DownloadControl {
    scheduler: Arc<Scheduler>,
    progress: Arc<ProgressTracker>,
}

impl DownloadControl {
    pub fn pause(&self) {
        self.scheduler.pause();
    }

    pub fn resume(&self) {
        self.scheduler.resume();
    }

    pub fn cancel(&self) {
        self.scheduler.cancel();
    }

    pub fn progress(&self) -> LiveProgress {
        self.progress.snapshot()
    }
}

impl DownloadHandle {
    pub fn control(&self) -> DownloadControl {
        DownloadControl {
            scheduler: self.scheduler.clone(),
            progress: self.progress.clone(),
        }
    }
}

fn empty_stats() -> DownloadStats {
    DownloadStats {
        successful: 0,
        failed: 0,
        success_ratio: 1.0,
        actual_size_bytes: 0,
        elapsed_ms: 0,
        average_speed_bps: 0.0,
        requests_issued: 0,
        errors: Vec::new(),
        failed_tiles: Vec::new(),
    }
}

/// Runs the full pipeline: `Validator → Grid+CRS resolver → Tile
/// enumerator → Deduplicator → [estimate] → Scheduler`, per the data-flow
/// diagram in spec.md §2.
#[instrument(skip(config), fields(service = %config.service_name))]
pub async fn download_tiles(config: DownloadConfig) -> Result<DownloadHandle, DownloadError> {
    let mut config = config.validate_and_normalize()?;

    if let Some(capabilities_url) = config.capabilities_url.clone() {
        let client = reqwest::Client::new();
        let resolved = capabilities::get_supported_crs(&client, &capabilities_url, None).await;
        if !grid::is_known_crs(&resolved.default) {
            return Err(DownloadError::Config(ConfigError::UnknownCrs(resolved.default)));
        }
        config.crs = resolved.default;
    }

    let grid = grid::grid_for_crs(&config.crs)?;

    let ranges: Vec<_> = (config.min_zoom..=config.max_zoom)
        .map(|z| grid.tile_range_for_bbox(&config.crs, config.bbox, z))
        .collect();

    let rotator = SubdomainRotator::new(config.subdomains.clone());
    let coords = enumerate::enumerate(&ranges, &config.service_name, &config.url_template, &rotator, config.tile_scheme);
    let coords = dedup::filter_existing(coords, config.existing_tiles.as_deref());

    let mut tiles_by_zoom: HashMap<u32, u64> = HashMap::new();
    for coord in &coords {
        *tiles_by_zoom.entry(coord.z).or_insert(0) += 1;
    }
    let total_tiles = coords.len() as u64;

    let progress = Arc::new(ProgressTracker::new(total_tiles, 0));

    let http_client = HttpClient::with_user_agent(config.user_agent.as_deref()).map_err(DownloadError::Client)?;

    progress.set_state(tile_download_shared::DownloadState::Estimating);
    let estimated_size = estimate::estimate_total_bytes(&http_client, &ranges, &config.url_template, &rotator, config.tile_scheme).await;
    progress.set_estimated_bytes(estimated_size);

    let failure_monitor = Arc::new(FailureMonitor::new());
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit));
    let retry_policy = RetryPolicy {
        retries: config.retries,
        base_delay_ms: config.retry_base_delay_ms,
    };

    let scheduler = Scheduler::new(progress.clone());
    let output = scheduler.clone().run(coords, http_client, rate_limiter, retry_policy, failure_monitor, config.concurrency);

    Ok(DownloadHandle {
        scheduler,
        progress,
        total_tiles,
        estimated_size,
        tiles_by_zoom,
        tiles_rx: output.tiles_rx,
        stats_rx: Some(output.stats_rx),
    })
}

pub fn validate_tile_url(url_template: &str, has_subdomains: bool) -> TemplateValidation {
    template::validate(url_template, has_subdomains)
}

pub async fn get_supported_crs(capabilities_url: &str, service_type_hint: Option<&str>) -> CapabilitiesResult {
    let client = reqwest::Client::new();
    capabilities::get_supported_crs(&client, capabilities_url, service_type_hint).await
}
