//! Deduplicator (C5): drop tiles the caller already has. Existing tiles
//! never count against totals, progress, or the failure threshold — they
//! are filtered out before any of those are initialized.

use tile_download_shared::{ExistingTiles, TileCoordinate};

pub fn filter_existing(
    coords: Vec<TileCoordinate>,
    existing: Option<&dyn ExistingTiles>,
) -> Vec<TileCoordinate> {
    match existing {
        None => coords,
        Some(set) => coords
            .into_iter()
            .filter(|c| !set.contains(&c.key()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn coord(z: u32, x: u64, y: u64) -> TileCoordinate {
        TileCoordinate {
            service_name: "osm".into(),
            z,
            x,
            y,
            url: format!("https://tile.example/{z}/{x}/{y}.png"),
        }
    }

    #[test]
    fn no_presence_set_keeps_everything() {
        let coords = vec![coord(1, 0, 0), coord(1, 0, 1)];
        let out = filter_existing(coords.clone(), None);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn presence_set_filters_matching_keys() {
        let mut existing = HashSet::new();
        existing.insert(coord(1, 0, 0).key());
        let coords = vec![coord(1, 0, 0), coord(1, 0, 1)];
        let out = filter_existing(coords, Some(&existing));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].y, 1);
    }

    #[test]
    fn second_run_with_all_keys_existing_yields_empty() {
        let mut existing = HashSet::new();
        existing.insert(coord(1, 0, 0).key());
        existing.insert(coord(1, 0, 1).key());
        let coords = vec![coord(1, 0, 0), coord(1, 0, 1)];
        let out = filter_existing(coords, Some(&existing));
        assert!(out.is_empty());
    }
}
