//! Wire protocol between a download owner and its worker task (C13,
//! spec.md §6). Every command carries a correlation `id`; every response
//! except `ProgressUpdate` echoes it straight back.
//!
//! This mirrors the tagged `{ "ty": ..., "data": ... }` shape the
//! telemetry websocket protocol uses, so a frontend already speaking that
//! convention can speak this one too.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tile_download_engine::DownloadConfig;
use tile_download_shared::{DownloadStats, ExistingTiles, LiveProgress, TileScheme};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "ty", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerCommand {
    StartDownload { id: String, config: DownloadConfigMsg },
    PauseDownload { id: String },
    ResumeDownload { id: String },
    CancelDownload { id: String },
    GetProgress { id: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "ty", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerResponse {
    DownloadStarted(DownloadStartedMsg),
    ProgressUpdate(ProgressUpdateMsg),
    TileDownloaded(TileDownloadedMsg),
    DownloadComplete(DownloadCompleteMsg),
    DownloadError(DownloadErrorMsg),
    DownloadCancelled(DownloadCancelledMsg),
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadStartedMsg {
    pub id: String,
    pub total_tiles: u64,
    pub estimated_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdateMsg {
    pub id: String,
    pub progress: LiveProgress,
}

#[derive(Debug, Clone, Serialize)]
pub struct TileDownloadedMsg {
    pub id: String,
    pub service_name: String,
    pub z: u32,
    pub x: u64,
    pub y: u64,
    pub byte_length: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadCompleteMsg {
    pub id: String,
    pub stats: DownloadStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadErrorMsg {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadCancelledMsg {
    pub id: String,
    pub stats: DownloadStats,
}

/// Wire-serializable twin of `DownloadConfig`. The one field that doesn't
/// cross a process/transport boundary cleanly — `existingTiles`, a trait
/// object over whatever presence store the caller has on hand — is simply
/// absent here; callers that need dedup build a `DownloadConfig` directly
/// instead of going through the worker protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadConfigMsg {
    pub service_name: String,
    pub url_template: String,
    pub bbox: [f64; 4],
    pub min_zoom: u32,
    pub max_zoom: u32,
    #[serde(default)]
    pub crs: Option<String>,
    #[serde(default)]
    pub subdomains: Option<Vec<String>>,
    #[serde(default)]
    pub tile_scheme: Option<TileScheme>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub rate_limit: Option<f64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(default)]
    pub capabilities_url: Option<String>,
}

impl DownloadConfigMsg {
    pub fn into_config(self) -> DownloadConfig {
        let mut config = DownloadConfig::new(self.service_name, self.url_template, self.bbox);
        config.min_zoom = self.min_zoom;
        config.max_zoom = self.max_zoom;
        if let Some(crs) = self.crs {
            config.crs = crs;
        }
        if let Some(subdomains) = self.subdomains {
            config.subdomains = subdomains;
        }
        if let Some(scheme) = self.tile_scheme {
            config.tile_scheme = scheme;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if self.rate_limit.is_some() {
            config.rate_limit = self.rate_limit;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(delay) = self.retry_base_delay_ms {
            config.retry_base_delay_ms = delay;
        }
        config.capabilities_url = self.capabilities_url;
        config
    }
}

/// Not part of the wire protocol — a way for a caller that already has an
/// in-process presence set to attach it to a command built in Rust,
/// bypassing `DownloadConfigMsg`'s deserialization path.
pub fn attach_existing_tiles(mut config: DownloadConfig, existing: Arc<dyn ExistingTiles>) -> DownloadConfig {
    config.existing_tiles = Some(existing);
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_download_round_trips_from_json() {
        let json = r#"{
            "ty": "START_DOWNLOAD",
            "data": {
                "id": "job-1",
                "config": {
                    "serviceName": "osm",
                    "urlTemplate": "https://tile.example/{z}/{x}/{y}.png",
                    "bbox": [13.3, 52.5, 13.5, 52.6],
                    "minZoom": 12,
                    "maxZoom": 13
                }
            }
        }"#;
        let command: WorkerCommand = serde_json::from_str(json).unwrap();
        match command {
            WorkerCommand::StartDownload { id, config } => {
                assert_eq!(id, "job-1");
                assert_eq!(config.min_zoom, 12);
                assert_eq!(config.max_zoom, 13);
            }
            _ => panic!("expected StartDownload"),
        }
    }

    #[test]
    fn config_msg_defaults_match_download_config_defaults() {
        let msg = DownloadConfigMsg {
            service_name: "osm".to_string(),
            url_template: "https://tile.example/{z}/{x}/{y}.png".to_string(),
            bbox: [0.0, 0.0, 1.0, 1.0],
            min_zoom: 0,
            max_zoom: 0,
            crs: None,
            subdomains: None,
            tile_scheme: None,
            concurrency: None,
            rate_limit: None,
            retries: None,
            retry_base_delay_ms: None,
            capabilities_url: None,
        };
        let config = msg.into_config();
        assert_eq!(config.crs, "EPSG:3857");
        assert_eq!(config.concurrency, 6);
        assert_eq!(config.retries, 5);
    }
}
