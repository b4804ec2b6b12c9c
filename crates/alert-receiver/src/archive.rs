//! Filesystem archive of processed alerts.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::Alert;
use crate::routing::AlertRoute;

/// Directory used when the configured one is not writable.
pub const FALLBACK_DIR: &str = "logs";

/// Collision suffixes tried before giving up on a file name.
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Archive failures.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Filesystem error
    #[error("archive I/O error at {}: {source}", .path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Alert could not be serialized
    #[error("failed to serialize alert: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One entry of the archive listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedAlert {
    /// File name inside the archive directory
    pub filename: String,
    /// Modification time, seconds since the Unix epoch
    pub timestamp: f64,
    /// Number of alerts in the file
    pub alerts_count: usize,
}

#[derive(Serialize)]
struct Record<'a> {
    alerts: [&'a Alert; 1],
}

/// One JSON file per alert under a single directory.
#[derive(Debug, Clone)]
pub struct AlertArchive {
    dir: PathBuf,
}

impl AlertArchive {
    /// Open the archive in `preferred`, falling back to `./logs` when it
    /// cannot be created or written.
    pub fn open(preferred: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        Self::open_with_fallback(preferred, FALLBACK_DIR)
    }

    /// Open the archive in `preferred`, falling back to `fallback` when it
    /// cannot be created or written.
    pub fn open_with_fallback(
        preferred: impl Into<PathBuf>,
        fallback: impl Into<PathBuf>,
    ) -> Result<Self, ArchiveError> {
        let preferred = preferred.into();
        match ensure_writable(&preferred) {
            Ok(()) => Ok(Self { dir: preferred }),
            Err(e) => {
                let fallback = fallback.into();
                warn!(
                    dir = %preferred.display(),
                    error = %e,
                    fallback = %fallback.display(),
                    "Alerts directory not writable, using fallback"
                );
                ensure_writable(&fallback).map_err(|source| ArchiveError::Io {
                    path: fallback.clone(),
                    source,
                })?;
                Ok(Self { dir: fallback })
            }
        }
    }

    /// Directory the archive writes to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `{"alerts": [alert]}` to a new `{type}_{timestamp}.json` file.
    pub fn persist(&self, alert: &Alert, route: AlertRoute) -> Result<PathBuf, ArchiveError> {
        let body = serde_json::to_vec_pretty(&Record { alerts: [alert] })?;
        let stem = format!("{route}_{}", Utc::now().format("%Y%m%d_%H%M%S_%6f"));

        // Timestamps are unique in practice; the suffix covers same-microsecond writes.
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}_{attempt}.json")
            };
            let path = self.dir.join(name);

            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(ArchiveError::Io { path, source }),
            };
            file.write_all(&body)
                .map_err(|source| ArchiveError::Io {
                    path: path.clone(),
                    source,
                })?;
            return Ok(path);
        }

        let path = self.dir.join(format!("{stem}.json"));
        Err(ArchiveError::Io {
            path,
            source: ErrorKind::AlreadyExists.into(),
        })
    }

    /// The `limit` most recently modified archive files, newest first.
    ///
    /// Unreadable or corrupt files are logged and skipped.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<ArchivedAlert>, ArchiveError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| ArchiveError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut files: Vec<(PathBuf, SystemTime)> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| {
                let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((path, modified))
            })
            .collect();

        files.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(files
            .into_iter()
            .filter_map(|(path, modified)| match read_entry(&path, modified) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    error!(file = %path.display(), error = %e, "Skipping unreadable alert file");
                    None
                }
            })
            .take(limit)
            .collect())
    }
}

fn read_entry(path: &Path, modified: SystemTime) -> Result<ArchivedAlert, ArchiveError> {
    let raw = fs::read(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_slice(&raw)?;
    let alerts_count = value
        .get("alerts")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    Ok(ArchivedAlert {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        timestamp: modified
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_secs_f64()),
        alerts_count,
    })
}

fn ensure_writable(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let check = dir.join(format!(".write-check-{}", std::process::id()));
    fs::write(&check, b"")?;
    fs::remove_file(&check)
}
