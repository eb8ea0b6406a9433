use thiserror::Error;

/// Raised eagerly from `download_tiles` before any fetch begins (§7 of the
/// design: config errors never surface mid-run).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("serviceName must be non-empty")]
    EmptyServiceName,

    #[error("urlTemplate is missing required placeholder(s): {missing:?}")]
    MissingPlaceholders { missing: Vec<&'static str> },

    #[error("minZoom ({min_zoom}) must be <= maxZoom ({max_zoom})")]
    ZoomRangeInverted { min_zoom: u32, max_zoom: u32 },

    #[error("unknown CRS {0:?}")]
    UnknownCrs(String),

    #[error("bbox must be [minLon, minLat, maxLon, maxLat] with minLat < maxLat")]
    InvalidBoundingBox,

    #[error("concurrency must be >= 1")]
    InvalidConcurrency,
}

/// Raised only when the failure monitor trips mid-run (§7: "the run
/// terminates with `failed` only when the failure monitor trips").
#[derive(Debug, Error)]
#[error("failure threshold exceeded: {failed}/{attempted} attempts failed")]
pub struct FailureThresholdExceeded {
    pub failed: u64,
    pub attempted: u64,
}

#[derive(Debug, Error)]
pub enum CapabilitiesError {
    #[error("request to capabilities URL failed: {0}")]
    Request(String),

    #[error("capabilities document did not parse as WMS or WMTS XML")]
    Unparseable,
}
