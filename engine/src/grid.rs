//! Projection/grid resolver (C2): given a CRS name, the extent and XYZ grid
//! math for it, and the WGS84 bbox transform into that CRS.

use crate::error::ConfigError;
use std::f64::consts::PI;
use tile_download_shared::TileRange;

/// WGS84 semi-major axis, meters — the same constant every Web Mercator
/// implementation in the retrieval pack uses.
const EARTH_RADIUS_M: f64 = 6_378_137.0;
const WEB_MERCATOR_EXTENT: f64 = EARTH_RADIUS_M * PI;

pub const TILE_SIZE_PX: u32 = 256;

pub fn is_known_crs(crs: &str) -> bool {
    matches!(crs, "EPSG:3857" | "EPSG:4326")
}

/// A tile grid over one CRS: its world extent in the CRS's own units, and
/// how many tile columns/rows span that extent at zoom 0.
#[derive(Debug, Clone, Copy)]
pub struct TileGrid {
    crs_extent: (f64, f64, f64, f64), // (min_x, min_y, max_x, max_y)
    cols_at_zoom0: u64,
    rows_at_zoom0: u64,
    tile_size: u32,
}

impl TileGrid {
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn extent(&self) -> (f64, f64, f64, f64) {
        self.crs_extent
    }

    /// Projects a WGS84-degrees point into this grid's CRS units.
    fn project(&self, crs: &str, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        match crs {
            "EPSG:3857" => {
                let lon_rad = lon_deg.to_radians();
                let lat_rad = lat_deg
                    .clamp(-85.051_128_78, 85.051_128_78)
                    .to_radians();
                let x = EARTH_RADIUS_M * lon_rad;
                let y = EARTH_RADIUS_M * ((PI / 4.0 + lat_rad / 2.0).tan()).ln();
                (x, y)
            }
            "EPSG:4326" => (lon_deg, lat_deg),
            _ => unreachable!("is_known_crs must gate construction"),
        }
    }

    /// Transforms a WGS84 bbox into this grid's projected extent, then
    /// returns the inclusive tile rectangle it covers at zoom `z`.
    pub fn tile_range_for_bbox(&self, crs: &str, bbox_wgs84: [f64; 4], z: u32) -> TileRange {
        let [min_lon, min_lat, max_lon, max_lat] = bbox_wgs84;
        let (px_min, py_min) = self.project(crs, min_lon, min_lat);
        let (px_max, py_max) = self.project(crs, max_lon, max_lat);
        self.tile_range_for_extent_and_z((px_min, py_min, px_max, py_max), z)
    }

    /// Converts a projected-units extent directly into a tile range (the
    /// scheme-agnostic grid math; y always increases toward the grid's
    /// south edge here, matching `xyz`/`wmts` convention — the `tms`
    /// y-inversion happens later, at URL materialization time).
    pub fn tile_range_for_extent_and_z(&self, extent: (f64, f64, f64, f64), z: u32) -> TileRange {
        let (px_min, py_min, px_max, py_max) = extent;
        let (world_min_x, world_min_y, world_max_x, world_max_y) = self.crs_extent;
        let world_w = world_max_x - world_min_x;
        let world_h = world_max_y - world_min_y;

        let cols = self.cols_at_zoom0 * 2u64.pow(z);
        let rows = self.rows_at_zoom0 * 2u64.pow(z);

        let tile_x_for = |px: f64| -> u64 {
            let frac = ((px - world_min_x) / world_w).clamp(0.0, 1.0);
            ((frac * cols as f64).floor() as u64).min(cols - 1)
        };
        // y increases south, so the northern (max) latitude maps to the
        // smaller tile-y index.
        let tile_y_for = |py: f64| -> u64 {
            let frac = ((world_max_y - py) / world_h).clamp(0.0, 1.0);
            ((frac * rows as f64).floor() as u64).min(rows - 1)
        };

        let x_a = tile_x_for(px_min);
        let x_b = tile_x_for(px_max);
        let y_a = tile_y_for(py_min);
        let y_b = tile_y_for(py_max);

        TileRange {
            z,
            min_x: x_a.min(x_b),
            max_x: x_a.max(x_b),
            min_y: y_a.min(y_b),
            max_y: y_a.max(y_b),
        }
    }
}

/// Resolves a CRS name to its grid. Rejects unknown CRS names with a config
/// error — the resolver never silently falls back.
pub fn grid_for_crs(crs: &str) -> Result<TileGrid, ConfigError> {
    match crs {
        "EPSG:3857" => Ok(TileGrid {
            crs_extent: (
                -WEB_MERCATOR_EXTENT,
                -WEB_MERCATOR_EXTENT,
                WEB_MERCATOR_EXTENT,
                WEB_MERCATOR_EXTENT,
            ),
            cols_at_zoom0: 1,
            rows_at_zoom0: 1,
            tile_size: TILE_SIZE_PX,
        }),
        "EPSG:4326" => Ok(TileGrid {
            crs_extent: (-180.0, -90.0, 180.0, 90.0),
            cols_at_zoom0: 2,
            rows_at_zoom0: 1,
            tile_size: TILE_SIZE_PX,
        }),
        other => Err(ConfigError::UnknownCrs(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_crs_is_rejected() {
        assert!(grid_for_crs("EPSG:9999").is_err());
    }

    #[test]
    fn berlin_bbox_is_nonempty_at_z12() {
        let grid = grid_for_crs("EPSG:3857").unwrap();
        let range = grid.tile_range_for_bbox("EPSG:3857", [13.3, 52.5, 13.5, 52.6], 12);
        assert!(range.count() > 0);
    }

    #[test]
    fn single_tile_world_at_zoom0() {
        let grid = grid_for_crs("EPSG:3857").unwrap();
        let range = grid.tile_range_for_bbox("EPSG:3857", [-179.0, -80.0, 179.0, 80.0], 0);
        assert_eq!(range.min_x, 0);
        assert_eq!(range.max_x, 0);
        assert_eq!(range.min_y, 0);
        assert_eq!(range.max_y, 0);
    }

    #[test]
    fn antimeridian_bbox_yields_nonempty_range() {
        // A bbox that straddles +/-180 is interpreted literally (min > max
        // is the caller's problem per spec.md's bbox invariants), but a
        // bbox strictly inside the extent near the edge must still resolve.
        let grid = grid_for_crs("EPSG:3857").unwrap();
        let range = grid.tile_range_for_bbox("EPSG:3857", [179.0, -10.0, 179.9, 10.0], 5);
        assert!(range.count() > 0);
    }

    #[test]
    fn wgs84_grid_has_two_columns_at_zoom0() {
        let grid = grid_for_crs("EPSG:4326").unwrap();
        let range = grid.tile_range_for_bbox("EPSG:4326", [-179.0, -89.0, 179.0, 89.0], 0);
        assert_eq!(range.min_x, 0);
        assert_eq!(range.max_x, 1);
    }
}
