use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;

const DEFAULT_TEMP_PREFIX: &str = "capture_";
const DEFAULT_FALLBACK_TEMP_DIR: &str = "/tmp/snapask";
const APP_RUNTIME_SUBDIR: &str = "snapask";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Default, Clone)]
pub struct PruneReport {
    pub removed_files: usize,
}

/// Scratch directory for screenshot tool output that is read back and deleted.
#[derive(Debug, Clone)]
pub struct TempCaptureDir {
    dir: PathBuf,
}

impl TempCaptureDir {
    pub const fn with_path(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn with_default_path() -> Self {
        Self::with_path(default_runtime_temp_dir())
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn path_for_capture(&self, capture_id: &str) -> PathBuf {
        self.dir.join(format!("{DEFAULT_TEMP_PREFIX}{capture_id}.png"))
    }

    pub fn prune_stale_files(&self, max_age: Duration) -> StorageResult<PruneReport> {
        let now = SystemTime::now();
        let mut report = PruneReport::default();

        if !self.dir.exists() {
            return Ok(report);
        }

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            if path
                .file_name()
                .and_then(|name| name.to_str())
                .is_none_or(|name| !name.starts_with(DEFAULT_TEMP_PREFIX))
            {
                continue;
            }

            let modified = fs::metadata(&path)?.modified()?;
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => report.removed_files += 1,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        ?err,
                        "failed to remove stale temp capture file"
                    );
                }
            }
        }

        Ok(report)
    }
}

/// Returns a fresh temp path for `capture_id`, creating the scratch directory
/// when needed.
pub fn create_temp_capture(capture_id: &str) -> StorageResult<PathBuf> {
    let dir = TempCaptureDir::with_default_path();
    fs::create_dir_all(dir.path())?;
    Ok(dir.path_for_capture(capture_id))
}

pub fn prune_stale_temp_files(max_age_hours: u64) -> StorageResult<PruneReport> {
    TempCaptureDir::with_default_path()
        .prune_stale_files(Duration::from_secs(max_age_hours.saturating_mul(60 * 60)))
}

fn default_runtime_temp_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|value| !value.is_empty())
        .map(|value| PathBuf::from(value).join(APP_RUNTIME_SUBDIR))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FALLBACK_TEMP_DIR))
}
