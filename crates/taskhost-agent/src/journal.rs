//! Crash-recovery journal of offline reports.
//!
//! Task-instance-side reporters append newline-delimited JSON records to a
//! well-known path when the live reporting path is down. The agent reads the
//! file once at startup, replays every record, then deletes the file. Between
//! agent restarts the file belongs to the reporters; the agent only touches
//! it during startup.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use taskhost_core::OfflineReport;

/// Errors reading or removing the journal. Anything other than a missing
/// file aborts agent startup.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("failed to read offline report journal {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed offline report at {path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to remove offline report journal {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Reader side of the offline-report journal.
pub struct OfflineReportJournal {
    path: PathBuf,
}

impl OfflineReportJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every journaled report in file order. A missing file is an empty
    /// journal; empty lines are skipped.
    pub async fn load(&self) -> Result<Vec<OfflineReport>, JournalError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "offline report journal doesn't exist");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(JournalError::Read {
                    path: self.path.clone(),
                    source: err,
                })
            }
        };

        let mut reports = Vec::new();
        for (index, line) in data.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let report =
                serde_json::from_str(line).map_err(|source| JournalError::Parse {
                    path: self.path.clone(),
                    line: index + 1,
                    source,
                })?;
            reports.push(report);
        }
        Ok(reports)
    }

    /// Delete the journal file. A missing file is fine.
    pub async fn remove(&self) -> Result<(), JournalError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(JournalError::Remove {
                path: self.path.clone(),
                source: err,
            }),
        }
    }
}
