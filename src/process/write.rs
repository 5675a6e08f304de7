use arrow::record_batch::RecordBatch;
use parquet::{arrow::ArrowWriter, file::properties::WriterProperties};
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::config::SnapshotCompression;
use crate::error::{FeedError, Result};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_parquet(
    batch: &RecordBatch,
    file: File,
    compression: SnapshotCompression,
) -> parquet::errors::Result<()> {
    let props = WriterProperties::builder()
        .set_compression(compression.to_parquet()?)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

/// Write `batch` to `path` as one Parquet file.
///
/// Data goes to a sibling `.tmp` file first and is renamed over `path` once
/// complete; on failure the temporary file is removed and `path` is untouched.
/// Returns the snapshot size in bytes.
pub fn write_snapshot(
    batch: &RecordBatch,
    path: &Path,
    compression: SnapshotCompression,
) -> Result<u64> {
    let tmp = temp_path(path);
    let file = File::create(&tmp).map_err(|e| FeedError::filesystem(&tmp, e))?;

    if let Err(source) = write_parquet(batch, file, compression) {
        discard(&tmp);
        return Err(FeedError::Snapshot {
            path: path.to_path_buf(),
            source,
        });
    }

    if let Err(e) = fs::rename(&tmp, path) {
        discard(&tmp);
        return Err(FeedError::filesystem(path, e));
    }

    let size = fs::metadata(path)
        .map_err(|e| FeedError::filesystem(path, e))?
        .len();
    debug!(path = %path.display(), rows = batch.num_rows(), bytes = size, "snapshot written");
    Ok(size)
}

fn discard(tmp: &Path) {
    if let Err(e) = fs::remove_file(tmp) {
        warn!(path = %tmp.display(), error = %e, "could not remove temporary snapshot");
    }
}
