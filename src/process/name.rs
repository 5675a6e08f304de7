use std::fmt;
use std::path::Path;

use crate::error::{FeedError, Result};
use crate::layout::SNAPSHOT_EXT;

pub const SOURCE_EXT: &str = ".csv";

/// A validated dataset name, always carrying the `.csv` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetName {
    file_name: String,
}

impl DatasetName {
    /// Fails with `InvalidArgument` on a missing or blank name, before any I/O.
    pub fn parse(name: Option<&str>) -> Result<Self> {
        let raw = name
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FeedError::InvalidArgument("no dataset name provided".into()))?;

        let file_name = if raw.ends_with(SOURCE_EXT) {
            raw.to_string()
        } else {
            format!("{}{}", raw, SOURCE_EXT)
        };

        let parsed = Self { file_name };
        if parsed.stem().is_empty() {
            return Err(FeedError::InvalidArgument(format!(
                "dataset name {:?} has no stem",
                raw
            )));
        }
        Ok(parsed)
    }

    /// Source file name, relative to the datasets directory.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Final path component without the `.csv` extension.
    ///
    /// Only that extension is removed: `mesas.2023` stays `mesas.2023`, not
    /// `mesas`. Leading directories are dropped, so every snapshot lands
    /// directly in the parquet directory (`raw/votos` gives `votos`).
    pub fn stem(&self) -> &str {
        let last = Path::new(&self.file_name)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(&self.file_name);
        last.strip_suffix(SOURCE_EXT).unwrap_or(last)
    }

    pub fn snapshot_name(&self) -> String {
        format!("{}.{}", self.stem(), SNAPSHOT_EXT)
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name)
    }
}
