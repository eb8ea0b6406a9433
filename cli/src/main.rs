mod db;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tile_download_engine::DownloadConfig;
use tile_download_shared::TileScheme;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Bulk-fetch a bounding box of map tiles with bounded concurrency, retries,
/// and pacing, writing each tile to disk and recording it in a sqlite index
/// so a re-run skips what's already there.
#[derive(Parser, Debug)]
#[command(name = "tiledl", version, about)]
struct Args {
    /// Logical name for the tile service, used as a namespace in the
    /// sqlite index and the output directory layout.
    #[arg(long)]
    service_name: String,

    /// URL template with `{z}`, `{x}`, `{y}`, and optionally `{s}`.
    #[arg(long)]
    url_template: String,

    /// `minLon,minLat,maxLon,maxLat` in WGS84 degrees.
    #[arg(long, value_delimiter = ',', num_args = 4)]
    bbox: Vec<f64>,

    #[arg(long)]
    min_zoom: u32,

    #[arg(long)]
    max_zoom: u32,

    #[arg(long, default_value = "EPSG:3857")]
    crs: String,

    #[arg(long, value_delimiter = ',')]
    subdomains: Option<Vec<String>>,

    #[arg(long, value_enum, default_value = "xyz")]
    tile_scheme: CliTileScheme,

    #[arg(long, env = "TILEDL_CONCURRENCY")]
    concurrency: Option<usize>,

    #[arg(long, env = "TILEDL_RATE_LIMIT")]
    rate_limit: Option<f64>,

    #[arg(long, env = "TILEDL_USER_AGENT")]
    user_agent: Option<String>,

    #[arg(long, default_value_t = 5)]
    retries: u32,

    #[arg(long, default_value_t = 1000)]
    retry_base_delay_ms: u64,

    #[arg(long)]
    capabilities_url: Option<String>,

    /// Directory tiles are written to, as `<output>/<service>/<z>/<x>/<y>.<ext>`.
    #[arg(long, default_value = "./tiles")]
    output: PathBuf,

    /// Sqlite database tracking which tiles have already been fetched.
    #[arg(long, default_value = "sqlite://tiledl.sqlite3?mode=rwc")]
    database_url: String,

    /// File extension to give written tiles.
    #[arg(long, default_value = "img")]
    extension: String,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliTileScheme {
    Xyz,
    Tms,
    Wmts,
}

impl From<CliTileScheme> for TileScheme {
    fn from(value: CliTileScheme) -> Self {
        match value {
            CliTileScheme::Xyz => TileScheme::Xyz,
            CliTileScheme::Tms => TileScheme::Tms,
            CliTileScheme::Wmts => TileScheme::Wmts,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "tiledl=info".into()))
        .init();

    let bbox: [f64; 4] = args
        .bbox
        .clone()
        .try_into()
        .map_err(|_| anyhow::anyhow!("--bbox expects exactly 4 values: minLon,minLat,maxLon,maxLat"))?;

    let pool = db::open(&args.database_url).await?;
    let existing = db::load_existing_keys(&pool).await?;
    info!(count = existing.len(), "loaded existing tile index");

    let mut config = DownloadConfig::new(args.service_name.clone(), args.url_template.clone(), bbox);
    config.min_zoom = args.min_zoom;
    config.max_zoom = args.max_zoom;
    config.crs = args.crs;
    if let Some(subdomains) = args.subdomains {
        config.subdomains = subdomains;
    }
    config.tile_scheme = args.tile_scheme.into();
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    config.rate_limit = args.rate_limit;
    config.retries = args.retries;
    config.retry_base_delay_ms = args.retry_base_delay_ms;
    config.capabilities_url = args.capabilities_url;
    config.user_agent = args.user_agent;
    config.existing_tiles = Some(Arc::new(existing));

    let mut handle = tile_download_engine::download_tiles(config).await?;
    info!(
        total_tiles = handle.total_tiles(),
        estimated_size = handle.estimated_size(),
        "starting download"
    );

    let progress_bar = ProgressBar::new(handle.total_tiles());
    progress_bar.set_style(
        ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg} ETA {eta}")?.progress_chars("##-"),
    );

    let control = handle.control();
    let ticker_bar = progress_bar.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(500));
        loop {
            interval.tick().await;
            let snapshot = control.progress();
            ticker_bar.set_position(snapshot.downloaded + snapshot.failed);
            ticker_bar.set_message(format!("{:.1} KB/s", snapshot.current_speed_bps / 1024.0));
            if snapshot.state.is_terminal() {
                break;
            }
        }
    });

    while let Some(payload) = handle.next_tile().await {
        let key = payload.key();
        let path = args
            .output
            .join(&payload.service_name)
            .join(payload.z.to_string())
            .join(payload.x.to_string());
        if let Err(e) = tokio::fs::create_dir_all(&path).await {
            warn!(error = %e, path = %path.display(), "failed to create tile directory");
            continue;
        }
        let file_path = path.join(format!("{}.{}", payload.y, args.extension));
        match tokio::fs::File::create(&file_path).await {
            Ok(mut file) => {
                if let Err(e) = file.write_all(&payload.bytes).await {
                    warn!(error = %e, path = %file_path.display(), "failed to write tile");
                    continue;
                }
            }
            Err(e) => {
                warn!(error = %e, path = %file_path.display(), "failed to create tile file");
                continue;
            }
        }
        if let Err(e) = db::record_tile(&pool, &key, &payload.bytes).await {
            warn!(error = %e, "failed to record tile in sqlite index");
        }
    }

    let stats_result = handle.stats().await;
    let _ = ticker.await;

    match stats_result {
        Ok(stats) => {
            progress_bar.finish_with_message("done");
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Err(exceeded) => {
            progress_bar.abandon_with_message("failure threshold exceeded");
            Err(anyhow::anyhow!(exceeded))
        }
    }
}
