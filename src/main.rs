use anyhow::{Context, Result};
use datafeed::{fetch, load_and_convert, FeedConfig};
use std::env;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    // ─── 2) config + directory layout ────────────────────────────────
    let config = FeedConfig::load().context("loading configuration")?;
    let layout = config.layout();
    layout
        .ensure()
        .with_context(|| format!("bootstrapping {}", layout.root().display()))?;
    info!(root = %layout.root().display(), "layout ready");

    // ─── 3) load, convert, snapshot ──────────────────────────────────
    let fetcher = fetch::from_config(&config, &layout)?;
    let dataset = env::args().nth(1);
    let report = load_and_convert(dataset.as_deref(), &layout, &config, fetcher.as_ref())?;

    info!(
        rows = report.rows,
        columns = report.columns,
        bytes = report.snapshot_bytes,
        fetched = report.fetched,
        snapshot = %report.snapshot.display(),
        "done"
    );
    Ok(())
}
