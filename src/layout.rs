// src/layout.rs

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::error::{FeedError, Result};
use crate::process::DatasetName;

pub const DATASETS_DIR: &str = "datasets";
pub const PARQUET_DIR: &str = "datasets/parquet";
pub const SAMPLES_DIR: &str = "datasets/samples";
pub const FEATURES_DIR: &str = "features";

pub const SNAPSHOT_EXT: &str = "parquet";

/// Fixed directory layout rooted at the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Raw input CSVs.
    pub fn datasets_dir(&self) -> PathBuf {
        self.root.join(DATASETS_DIR)
    }

    /// Parquet snapshots.
    pub fn parquet_dir(&self) -> PathBuf {
        self.root.join(PARQUET_DIR)
    }

    pub fn samples_dir(&self) -> PathBuf {
        self.root.join(SAMPLES_DIR)
    }

    pub fn features_dir(&self) -> PathBuf {
        self.root.join(FEATURES_DIR)
    }

    pub fn dirs(&self) -> [PathBuf; 4] {
        [
            self.datasets_dir(),
            self.parquet_dir(),
            self.samples_dir(),
            self.features_dir(),
        ]
    }

    pub fn source_path(&self, name: &DatasetName) -> PathBuf {
        self.datasets_dir().join(name.file_name())
    }

    pub fn snapshot_path(&self, name: &DatasetName) -> PathBuf {
        self.parquet_dir().join(name.snapshot_name())
    }

    /// Create every missing directory. Existing directories are left alone.
    pub fn ensure(&self) -> Result<()> {
        for dir in self.dirs() {
            if dir.is_dir() {
                continue;
            }
            fs::create_dir_all(&dir).map_err(|e| FeedError::filesystem(&dir, e))?;
            debug!(dir = %dir.display(), "created");
        }
        Ok(())
    }
}
