// src/config.rs

use anyhow::{Context, Result};
use arrow::array::timezone::Tz;
use parquet::basic::{BrotliLevel, Compression, ZstdLevel};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info};

use crate::error::FeedError;
use crate::layout::Layout;

pub const CONFIG_FILE: &str = "datafeed.yaml";
pub const DEFAULT_TIMEZONE: &str = "America/Buenos_Aires";
pub const DEFAULT_DATE_SUFFIX: &str = "_at";
pub const DEFAULT_DATE_COLUMN: &str = "fecha_mesa_epoch";

/// What to do with a date-like value that is not epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoercionPolicy {
    /// Keep the column as read and report the offending values.
    #[default]
    Lenient,
    /// Abort the run.
    Strict,
}

impl FromStr for CoercionPolicy {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lenient" => Ok(CoercionPolicy::Lenient),
            "strict" => Ok(CoercionPolicy::Strict),
            other => Err(FeedError::Config(format!("unknown coercion policy {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotCompression {
    None,
    #[default]
    Snappy,
    Zstd,
    Brotli,
}

impl SnapshotCompression {
    pub fn to_parquet(self) -> parquet::errors::Result<Compression> {
        Ok(match self {
            SnapshotCompression::None => Compression::UNCOMPRESSED,
            SnapshotCompression::Snappy => Compression::SNAPPY,
            SnapshotCompression::Zstd => Compression::ZSTD(ZstdLevel::try_new(3)?),
            SnapshotCompression::Brotli => Compression::BROTLI(BrotliLevel::try_new(5)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Project root; every storage directory hangs off it.
    pub root: PathBuf,
    /// Where the fetch fallback downloads the raw dataset from.
    pub source_url: Option<String>,
    /// IANA zone the converted timestamps are tagged with.
    pub timezone: String,
    pub coercion: CoercionPolicy,
    /// Columns ending with this are epoch seconds.
    pub date_suffix: String,
    /// Extra epoch-second columns matched by exact name.
    pub date_columns: Vec<String>,
    pub compression: SnapshotCompression,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            source_url: None,
            timezone: DEFAULT_TIMEZONE.to_string(),
            coercion: CoercionPolicy::default(),
            date_suffix: DEFAULT_DATE_SUFFIX.to_string(),
            date_columns: vec![DEFAULT_DATE_COLUMN.to_string()],
            compression: SnapshotCompression::default(),
        }
    }
}

impl FeedConfig {
    /// Defaults, then the YAML file (if any), then `DATAFEED_*` environment overrides.
    pub fn load() -> Result<Self> {
        let root = match env::var("DATAFEED_ROOT") {
            Ok(r) => PathBuf::from(r),
            Err(_) => env::current_dir().context("resolving current directory")?,
        };

        let file = env::var("DATAFEED_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| root.join(CONFIG_FILE));

        let mut cfg = if file.exists() {
            info!(path = %file.display(), "loading config");
            Self::from_yaml_file(&file)?
        } else {
            debug!(path = %file.display(), "no config file, using defaults");
            Self::default()
        };
        if cfg.root == Path::new(".") {
            cfg.root = root;
        }

        cfg.apply_env(|key| env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply environment overrides through `lookup` so tests need not touch the process env.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("DATAFEED_ROOT") {
            self.root = PathBuf::from(root);
        }
        if let Some(url) = lookup("DATAFEED_SOURCE_URL") {
            self.source_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(tz) = lookup("DATAFEED_TIMEZONE") {
            self.timezone = tz;
        }
        if let Some(policy) = lookup("DATAFEED_COERCION") {
            self.coercion = policy.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), FeedError> {
        Tz::from_str(&self.timezone)
            .map_err(|e| FeedError::Config(format!("timezone {:?}: {}", self.timezone, e)))?;
        if self.date_suffix.is_empty() {
            return Err(FeedError::Config("date_suffix must not be empty".into()));
        }
        Ok(())
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.root)
    }
}
