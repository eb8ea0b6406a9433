use crate::error::ConfigError;
use std::sync::Arc;
use tile_download_shared::{ExistingTiles, TileScheme};

/// Caller-supplied configuration for one download run (`spec.md` §3).
#[derive(Clone)]
pub struct DownloadConfig {
    pub service_name: String,
    pub url_template: String,
    /// `[minLon, minLat, maxLon, maxLat]`, WGS84 degrees.
    pub bbox: [f64; 4],
    pub min_zoom: u32,
    pub max_zoom: u32,
    pub crs: String,
    pub subdomains: Vec<String>,
    pub tile_scheme: TileScheme,
    pub concurrency: usize,
    pub rate_limit: Option<f64>,
    pub retries: u32,
    pub retry_base_delay_ms: u64,
    pub existing_tiles: Option<Arc<dyn ExistingTiles>>,
    pub capabilities_url: Option<String>,
    /// Overrides the engine's default `tile-download-engine/<version>`
    /// `User-Agent` header. `None` keeps the default.
    pub user_agent: Option<String>,
}

impl DownloadConfig {
    /// Builder-ish constructor applying the defaults documented in
    /// `spec.md` §3. Callers set only what differs.
    pub fn new(service_name: impl Into<String>, url_template: impl Into<String>, bbox: [f64; 4]) -> Self {
        let url_template = url_template.into();
        let has_subdomain_slot = url_template.contains("{s}");
        Self {
            service_name: service_name.into(),
            url_template,
            bbox,
            min_zoom: 0,
            max_zoom: 0,
            crs: "EPSG:3857".to_string(),
            subdomains: if has_subdomain_slot {
                vec!["a".to_string(), "b".to_string(), "c".to_string()]
            } else {
                Vec::new()
            },
            tile_scheme: TileScheme::Xyz,
            concurrency: 6,
            rate_limit: None,
            retries: 5,
            retry_base_delay_ms: 1000,
            existing_tiles: None,
            capabilities_url: None,
            user_agent: None,
        }
    }

    /// Validates the config and normalizes it (clamps concurrency). Must be
    /// called, and must fail fast, before any network activity starts.
    pub(crate) fn validate_and_normalize(mut self) -> Result<Self, ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }

        let validation = crate::template::validate(&self.url_template, !self.subdomains.is_empty());
        if !validation.missing.is_empty() {
            return Err(ConfigError::MissingPlaceholders {
                missing: validation.missing,
            });
        }

        if self.min_zoom > self.max_zoom {
            return Err(ConfigError::ZoomRangeInverted {
                min_zoom: self.min_zoom,
                max_zoom: self.max_zoom,
            });
        }

        let [min_lon, min_lat, max_lon, max_lat] = self.bbox;
        if !(min_lat < max_lat) || !min_lon.is_finite() || !max_lon.is_finite() {
            return Err(ConfigError::InvalidBoundingBox);
        }

        if !crate::grid::is_known_crs(&self.crs) {
            return Err(ConfigError::UnknownCrs(self.crs.clone()));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        self.concurrency = self.concurrency.clamp(1, 6);

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = DownloadConfig::new("osm", "https://{s}.tile.example/{z}/{x}/{y}.png", [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(cfg.subdomains, vec!["a", "b", "c"]);
        assert_eq!(cfg.tile_scheme, TileScheme::Xyz);
        assert_eq!(cfg.concurrency, 6);
        assert_eq!(cfg.retries, 5);
        assert_eq!(cfg.retry_base_delay_ms, 1000);
        assert_eq!(cfg.crs, "EPSG:3857");
    }

    #[test]
    fn no_subdomain_slot_means_no_default_subdomains() {
        let cfg = DownloadConfig::new("osm", "https://tile.example/{z}/{x}/{y}.png", [0.0, 0.0, 1.0, 1.0]);
        assert!(cfg.subdomains.is_empty());
    }

    #[test]
    fn rejects_inverted_zoom_range() {
        let mut cfg = DownloadConfig::new("osm", "https://tile.example/{z}/{x}/{y}.png", [0.0, 0.0, 1.0, 1.0]);
        cfg.min_zoom = 5;
        cfg.max_zoom = 2;
        assert!(matches!(
            cfg.validate_and_normalize(),
            Err(ConfigError::ZoomRangeInverted { .. })
        ));
    }

    #[test]
    fn concurrency_clamped_to_six() {
        let mut cfg = DownloadConfig::new("osm", "https://tile.example/{z}/{x}/{y}.png", [0.0, 0.0, 1.0, 1.0]);
        cfg.concurrency = 99;
        let cfg = cfg.validate_and_normalize().unwrap();
        assert_eq!(cfg.concurrency, 6);
    }
}
