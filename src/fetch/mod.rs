// src/fetch/mod.rs

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use std::path::PathBuf;
use tracing::info;
use url::Url;

use crate::config::FeedConfig;
use crate::layout::Layout;

pub mod zips;

/// Makes the raw dataset files present under the datasets directory.
///
/// The loader only relies on that post-condition, never on how it is met.
pub trait Fetch {
    fn fetch(&self) -> Result<()>;
}

/// Used when no source URL is configured: the fallback always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

impl Fetch for Unconfigured {
    fn fetch(&self) -> Result<()> {
        Err(anyhow!(
            "no source url configured (set DATAFEED_SOURCE_URL or `source_url`)"
        ))
    }
}

/// Downloads a single file or a ZIP of CSVs into the datasets directory.
pub struct HttpFetcher {
    client: Client,
    url: Url,
    dest_dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(url: &str, dest_dir: impl Into<PathBuf>) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("parsing source url {}", url))?;
        Ok(Self {
            client: Client::new(),
            url,
            dest_dir: dest_dir.into(),
        })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self) -> Result<()> {
        info!(url = %self.url, dest = %self.dest_dir.display(), "fetching dataset");
        let bytes = self
            .client
            .get(self.url.clone())
            .send()
            .with_context(|| format!("GET {}", self.url))?
            .error_for_status()
            .with_context(|| format!("non-success status from {}", self.url))?
            .bytes()
            .with_context(|| format!("reading body from {}", self.url))?;

        let written = zips::store_payload(&self.url, &bytes, &self.dest_dir)?;
        info!(files = written.len(), "dataset fetched");
        Ok(())
    }
}

/// Pick the fetcher for `config`: HTTP when a URL is set, otherwise `Unconfigured`.
pub fn from_config(config: &FeedConfig, layout: &Layout) -> Result<Box<dyn Fetch>> {
    match config.source_url.as_deref() {
        Some(url) => Ok(Box::new(HttpFetcher::new(url, layout.datasets_dir())?)),
        None => Ok(Box::new(Unconfigured)),
    }
}
