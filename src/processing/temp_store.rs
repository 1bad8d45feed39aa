// Scratch files holding request images for the duration of one OCR call
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine};
use log::{debug, info, warn};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use crate::utils::ScanError;

const FILE_PREFIX: &str = "scan_";
const FILE_SUFFIX: &str = ".jpg";

/// Files older than this are removed by [`TempStore::sweep_stale`].
pub const RETENTION: Duration = Duration::from_secs(60 * 60);

/// Interval of the background sweeper started by [`TempStore::spawn_sweeper`].
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub struct TempStore {
    dir: PathBuf,
}

/// A scratch image file. Deleted when dropped.
#[derive(Debug)]
pub struct TempImage {
    file: NamedTempFile,
}

impl TempImage {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the file now, reporting failures instead of ignoring them.
    pub fn release(self) -> Result<(), ScanError> {
        self.file.close()?;
        Ok(())
    }
}

impl TempStore {
    /// Open a store rooted at `dir`, creating the directory when missing.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ScanError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(TempStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write image bytes to a fresh scratch file.
    ///
    /// Bytes that decode as standard base64 are written decoded; anything
    /// else is written unchanged. The name carries a nanosecond clock reading
    /// plus random characters, so concurrent requests never share a file.
    pub fn acquire(&self, image_data: &[u8]) -> Result<TempImage, ScanError> {
        let bytes = decode_image_bytes(image_data);

        let prefix = format!("{}{}_", FILE_PREFIX, clock_nanos());
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(FILE_SUFFIX)
            .tempfile_in(&self.dir)?;

        file.write_all(&bytes)?;
        file.flush()?;

        debug!("Wrote {} image bytes to {}", bytes.len(), file.path().display());
        Ok(TempImage { file })
    }

    /// Remove scratch files older than [`RETENTION`].
    pub fn sweep_stale(&self) -> Result<usize, ScanError> {
        self.sweep_older_than(RETENTION)
    }

    /// Remove scratch files whose modification time is older than `max_age`.
    /// Files not created by this store are left alone. Returns the number removed.
    pub fn sweep_older_than(&self, max_age: Duration) -> Result<usize, ScanError> {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable temp entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if !is_scratch_file(&path) {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };

            // Future mtimes (clock skew) count as fresh
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age > max_age {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove stale temp file {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            info!("Removed {} stale temp files from {}", removed, self.dir.display());
        }
        Ok(removed)
    }

    /// Sweep every [`SWEEP_INTERVAL`] until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                        let store = Arc::clone(&self);
                        match tokio::task::spawn_blocking(move || store.sweep_stale()).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => warn!("Temp sweep failed: {}", e),
                            Err(e) => warn!("Temp sweep task failed: {}", e),
                        }
                    }
                }
            }
            debug!("Temp sweeper stopped");
        })
    }
}

fn decode_image_bytes(image_data: &[u8]) -> Vec<u8> {
    match STANDARD.decode(image_data) {
        Ok(decoded) => decoded,
        Err(_) => image_data.to_vec(),
    }
}

fn clock_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

fn is_scratch_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX))
        .unwrap_or(false)
}
