//! Size estimator (C6): samples a handful of real tiles per zoom range and
//! extrapolates a total byte estimate. Never blocks a run on a bad sample —
//! every failure mode collapses to the 15 KiB fallback.

use crate::http::HttpClient;
use crate::template::{materialize, SubdomainRotator};
use rand::Rng;
use tile_download_shared::{TileRange, TileScheme};
use tokio_util::sync::CancellationToken;

const MAX_SAMPLES_PER_RANGE: usize = 3;
const SAMPLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
const FALLBACK_BYTES: u64 = 15 * 1024;

/// A range needs at least this many tiles per axis before sampling trims
/// its outer 10% — small ranges are sampled edge-to-edge since there's no
/// meaningful "interior" to prefer.
const EDGE_EXCLUSION_MIN_SPAN: u64 = 4;

pub async fn estimate_total_bytes(
    client: &HttpClient,
    ranges: &[TileRange],
    template: &str,
    rotator: &SubdomainRotator,
    scheme: TileScheme,
) -> u64 {
    let mut total = 0u64;
    for range in ranges {
        let median = median_bytes_for_range(client, range, template, rotator, scheme).await;
        total = total.saturating_add(median.saturating_mul(range.count()));
    }
    total
}

async fn median_bytes_for_range(
    client: &HttpClient,
    range: &TileRange,
    template: &str,
    rotator: &SubdomainRotator,
    scheme: TileScheme,
) -> u64 {
    let coords = sample_coordinates(range);
    let mut sizes = Vec::new();

    for (x, y) in coords {
        let y_url = match scheme {
            TileScheme::Xyz | TileScheme::Wmts => y,
            TileScheme::Tms => 2u64.pow(range.z) - 1 - y,
        };
        let url = materialize(template, x, y_url, range.z, rotator.next());
        if let Some(size) = fetch_size(client, &url).await {
            sizes.push(size);
        }
    }

    if sizes.is_empty() {
        return FALLBACK_BYTES;
    }
    sizes.sort_unstable();
    sizes[sizes.len() / 2]
}

async fn fetch_size(client: &HttpClient, url: &str) -> Option<u64> {
    let cancel = CancellationToken::new();
    let attempt = tokio::time::timeout(SAMPLE_TIMEOUT, client.fetch_tile(url, &cancel))
        .await
        .ok()?;
    attempt.result.ok().map(|bytes| bytes.len() as u64)
}

/// Picks up to `MAX_SAMPLES_PER_RANGE` random coordinates, excluding the
/// outer 10% of each axis when the range is large enough for that to leave
/// a non-trivial interior. This keeps boundary tiles (more often blank
/// ocean/padding at the edge of a bounding box) from skewing the estimate.
fn sample_coordinates(range: &TileRange) -> Vec<(u64, u64)> {
    let (x_lo, x_hi) = interior_bounds(range.min_x, range.max_x);
    let (y_lo, y_hi) = interior_bounds(range.min_y, range.max_y);

    let total_candidates = (x_hi - x_lo + 1).saturating_mul(y_hi - y_lo + 1);
    let sample_count = MAX_SAMPLES_PER_RANGE.min(total_candidates as usize).max(1);

    let mut rng = rand::rng();
    let mut out = Vec::with_capacity(sample_count);
    for _ in 0..sample_count {
        let x = rng.random_range(x_lo..=x_hi);
        let y = rng.random_range(y_lo..=y_hi);
        out.push((x, y));
    }
    out
}

fn interior_bounds(min: u64, max: u64) -> (u64, u64) {
    let span = max - min;
    if span < EDGE_EXCLUSION_MIN_SPAN {
        return (min, max);
    }
    let margin = ((span as f64) * 0.1).round() as u64;
    let lo = min + margin;
    let hi = max.saturating_sub(margin);
    if lo >= hi {
        (min, max)
    } else {
        (lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_range_is_not_trimmed() {
        assert_eq!(interior_bounds(0, 2), (0, 2));
    }

    #[test]
    fn large_range_excludes_outer_ten_percent() {
        let (lo, hi) = interior_bounds(0, 100);
        assert!(lo > 0 && hi < 100);
        assert_eq!(lo, 10);
        assert_eq!(hi, 90);
    }

    #[test]
    fn sample_coordinates_stay_within_range_bounds() {
        let range = TileRange {
            z: 10,
            min_x: 0,
            max_x: 200,
            min_y: 0,
            max_y: 200,
        };
        let coords = sample_coordinates(&range);
        assert!(!coords.is_empty());
        for (x, y) in coords {
            assert!(x >= range.min_x && x <= range.max_x);
            assert!(y >= range.min_y && y <= range.max_y);
        }
    }

    #[test]
    fn single_tile_range_yields_exactly_one_sample() {
        let range = TileRange {
            z: 0,
            min_x: 0,
            max_x: 0,
            min_y: 0,
            max_y: 0,
        };
        let coords = sample_coordinates(&range);
        assert_eq!(coords, vec![(0, 0)]);
    }

    #[tokio::test]
    async fn unreachable_host_falls_back_to_default_size() {
        let client = HttpClient::new().unwrap();
        let rotator = SubdomainRotator::new(vec![]);
        let ranges = vec![TileRange {
            z: 1,
            min_x: 0,
            max_x: 1,
            min_y: 0,
            max_y: 1,
        }];
        let total = estimate_total_bytes(
            &client,
            &ranges,
            "http://127.0.0.1.invalid/{z}/{x}/{y}.png",
            &rotator,
            TileScheme::Xyz,
        )
        .await;
        assert_eq!(total, FALLBACK_BYTES * ranges[0].count());
    }
}
