use anyhow::{Context, Result};
use std::{
    fs,
    io::{Cursor, Read},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};
use url::Url;
use zip::ZipArchive;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

pub fn is_zip(url: &Url, bytes: &[u8]) -> bool {
    url.path().to_lowercase().ends_with(".zip") || bytes.starts_with(ZIP_MAGIC)
}

/// Store a downloaded payload under `dest_dir`.
///
/// ZIP payloads have every `.csv` entry extracted flat into `dest_dir`; anything
/// else is written under the URL's last path segment. Returns the written paths.
pub fn store_payload(url: &Url, bytes: &[u8], dest_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("creating {}", dest_dir.display()))?;

    if is_zip(url, bytes) {
        return extract_csvs(bytes, dest_dir);
    }

    let filename = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("download.csv");
    let dest_path = dest_dir.join(filename);
    fs::write(&dest_path, bytes).with_context(|| format!("writing {}", dest_path.display()))?;
    Ok(vec![dest_path])
}

/// Extract each `.csv` entry of an in-memory ZIP into `dest_dir`, dropping
/// any directories inside the archive.
pub fn extract_csvs(bytes: &[u8], dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).context("reading downloaded ZIP archive")?;

    let mut written = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("accessing ZIP entry #{}", i))?;
        let name = entry.name().to_string();
        if !entry.is_file() || !name.to_lowercase().ends_with(".csv") {
            debug!(entry = %name, "skipping");
            continue;
        }

        let Some(file_name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|f| f.to_os_string()))
        else {
            warn!(entry = %name, "unsafe entry name, skipping");
            continue;
        };

        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buf)
            .with_context(|| format!("reading {} from archive", name))?;

        let dest_path = dest_dir.join(file_name);
        fs::write(&dest_path, &buf).with_context(|| format!("writing {}", dest_path.display()))?;
        debug!(entry = %name, dest = %dest_path.display(), "extracted");
        written.push(dest_path);
    }

    Ok(written)
}
