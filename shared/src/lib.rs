//! Types shared between the download engine, the worker wrapper, and any
//! consumer crate. No async runtime dependency lives here on purpose: this
//! crate is safe to pull into a worker message boundary, a CLI, or a plain
//! persistence layer without dragging `tokio` along.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tiling scheme convention mapping `(z, x, y)` to a canonical position.
///
/// `Wmts` is treated identically to `Xyz` for grid math; the only
/// scheme-dependent step anywhere in the engine is the y-axis flip applied
/// to `Tms` at URL materialization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileScheme {
    Xyz,
    Tms,
    Wmts,
}

impl Default for TileScheme {
    fn default() -> Self {
        TileScheme::Xyz
    }
}

impl fmt::Display for TileScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TileScheme::Xyz => "xyz",
            TileScheme::Tms => "tms",
            TileScheme::Wmts => "wmts",
        };
        f.write_str(s)
    }
}

/// Identifies one tile and carries its materialized URL. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoordinate {
    pub service_name: String,
    pub z: u32,
    pub x: u64,
    pub y: u64,
    pub url: String,
}

impl TileCoordinate {
    /// Identity used for dedup/presence checks: `(serviceName, z, x, y)`. The
    /// URL is deliberately excluded — it is derived, not identifying.
    pub fn key(&self) -> TileKey {
        TileKey {
            service_name: self.service_name.clone(),
            z: self.z,
            x: self.x,
            y: self.y,
        }
    }
}

/// The `(serviceName, z, x, y)` identity of a tile, independent of its URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub service_name: String,
    pub z: u32,
    pub x: u64,
    pub y: u64,
}

/// The fetched artifact handed to the consumer. Ownership transfers to the
/// consumer on yield; the engine retains no copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilePayload {
    pub service_name: String,
    pub z: u32,
    pub x: u64,
    pub y: u64,
    pub bytes: Vec<u8>,
}

impl TilePayload {
    pub fn byte_length(&self) -> usize {
        self.bytes.len()
    }

    pub fn key(&self) -> TileKey {
        TileKey {
            service_name: self.service_name.clone(),
            z: self.z,
            x: self.x,
            y: self.y,
        }
    }
}

/// An inclusive rectangle of tile coordinates at one zoom level, in tile space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub z: u32,
    pub min_x: u64,
    pub max_x: u64,
    pub min_y: u64,
    pub max_y: u64,
}

impl TileRange {
    pub fn count(&self) -> u64 {
        (self.max_x - self.min_x + 1) * (self.max_y - self.min_y + 1)
    }
}

/// Finite states of a single download run. Transitions are documented next
/// to the scheduler that drives them (`engine::scheduler`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Idle,
    Estimating,
    Downloading,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Cancelled | DownloadState::Failed
        )
    }
}

/// Read-only snapshot of in-progress state. Cheap to clone; no callback
/// fan-out, the caller polls or subscribes to a broadcast of these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveProgress {
    pub state: DownloadState,
    pub downloaded: u64,
    pub failed: u64,
    pub pending: u64,
    pub retrying: u64,
    pub total: u64,
    pub downloaded_bytes: u64,
    pub estimated_bytes: u64,
    pub percent_complete: f64,
    pub current_speed_bps: f64,
    pub eta_seconds: f64,
}

/// Classification of a per-tile failure. `retryable` is derived from `kind`
/// plus HTTP status at classification time (`engine::retry`), not stored
/// redundantly on this type's constructors — callers read the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileErrorKind {
    Network,
    Http,
    Timeout,
    Cors,
    Parse,
    Cancelled,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileError {
    pub tile: TileKey,
    pub kind: TileErrorKind,
    pub http_status: Option<u16>,
    pub message: String,
    pub attempts: u32,
    pub timestamp_ms: u64,
    pub retryable: bool,
}

/// Final record produced when a run reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadStats {
    pub successful: u64,
    pub failed: u64,
    pub success_ratio: f64,
    pub actual_size_bytes: u64,
    pub elapsed_ms: u64,
    pub average_speed_bps: f64,
    pub requests_issued: u64,
    pub errors: Vec<TileError>,
    pub failed_tiles: Vec<TileKey>,
}

/// Caller-supplied presence set for dedup: "this tile is already on disk,
/// don't refetch it." Just a key predicate — the engine never inspects
/// whatever storage backs it.
pub trait ExistingTiles: Send + Sync {
    fn contains(&self, key: &TileKey) -> bool;
}

impl ExistingTiles for std::collections::HashSet<TileKey> {
    fn contains(&self, key: &TileKey) -> bool {
        std::collections::HashSet::contains(self, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_range_count_is_inclusive() {
        let r = TileRange {
            z: 3,
            min_x: 2,
            max_x: 4,
            min_y: 1,
            max_y: 1,
        };
        assert_eq!(r.count(), 3);
    }

    #[test]
    fn default_scheme_is_xyz() {
        assert_eq!(TileScheme::default(), TileScheme::Xyz);
    }

    #[test]
    fn terminal_states() {
        assert!(DownloadState::Completed.is_terminal());
        assert!(DownloadState::Cancelled.is_terminal());
        assert!(DownloadState::Failed.is_terminal());
        assert!(!DownloadState::Downloading.is_terminal());
        assert!(!DownloadState::Paused.is_terminal());
    }
}
