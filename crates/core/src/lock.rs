//! Single-instance guard for periodic jobs.
//!
//! A job owns a marker file `<lock_dir>/<job>.lock` while it runs. Creating
//! the marker is atomic (`create_new`), so two invocations of the same job can
//! never both acquire it. The marker carries no lease: a process that dies
//! without releasing leaves it behind and an operator has to remove it.

use std::{
    fs::OpenOptions,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("invalid job name {0:?}")]
    InvalidJobName(String),

    #[error("lock marker {path} is not accessible")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Contents of a lock marker, written for the operator's benefit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    pub job: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Write a freshly created marker. On failure the marker is removed again,
/// a half written marker would lock the job out for good.
fn fill_marker(path: &Path, mut file: impl Write, body: &[u8]) -> std::io::Result<()> {
    let written = file.write_all(body).and_then(|_| file.flush());
    drop(file);

    if let Err(err) = written {
        if let Err(cleanup) = std::fs::remove_file(path) {
            error!(path = %path.display(), %cleanup, "failed to remove partial lock marker");
        }

        return Err(err);
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub struct LockCoordinator {
    dir: PathBuf,
}

impl LockCoordinator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn marker_path(&self, job: &str) -> Result<PathBuf, LockError> {
        let valid = !job.is_empty()
            && job
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !job.starts_with('.');

        if !valid {
            return Err(LockError::InvalidJobName(job.to_string()));
        }

        Ok(self.dir.join(format!("{job}.lock")))
    }

    /// Create the marker for `job`. Returns `false` if it already exists.
    pub fn try_acquire(&self, job: &str) -> Result<bool, LockError> {
        let path = self.marker_path(job)?;

        let io_err = |source: std::io::Error| LockError::Io {
            path: path.clone(),
            source,
        };

        let info = LockInfo {
            job: job.to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        let body = serde_json::to_vec(&info).map_err(|x| io_err(x.into()))?;

        std::fs::create_dir_all(&self.dir).map_err(io_err)?;

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(io_err(err)),
        };

        fill_marker(&path, file, &body).map_err(io_err)?;

        Ok(true)
    }

    /// Remove the marker for `job`, whoever created it. A missing marker is
    /// not an error.
    pub fn release(&self, job: &str) -> Result<(), LockError> {
        let path = self.marker_path(job)?;

        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    pub fn is_locked(&self, job: &str) -> bool {
        self.marker_path(job)
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    /// Read who holds the marker, if anybody. Markers that can't be decoded
    /// are reported as held by an unknown process.
    pub fn holder(&self, job: &str) -> Result<Option<LockInfo>, LockError> {
        let path = self.marker_path(job)?;

        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(LockError::Io { path, source }),
        };

        match serde_json::from_slice(&raw) {
            Ok(info) => Ok(Some(info)),
            Err(err) => {
                warn!(job, %err, "lock marker is not readable");

                Ok(Some(LockInfo {
                    job: job.to_string(),
                    pid: 0,
                    acquired_at: DateTime::<Utc>::UNIX_EPOCH,
                }))
            }
        }
    }

    /// Acquire `job` and hand back a guard that releases it when dropped.
    pub fn guard(&self, job: &str) -> Result<Option<LockGuard>, LockError> {
        if !self.try_acquire(job)? {
            return Ok(None);
        }

        Ok(Some(LockGuard {
            coordinator: self.clone(),
            job: job.to_string(),
            released: false,
        }))
    }
}

/// Holds a job lock for as long as it lives
#[derive(Debug)]
pub struct LockGuard {
    coordinator: LockCoordinator,
    job: String,
    released: bool,
}

impl LockGuard {
    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.coordinator.release(&self.job)
    }

    /// Release once the job is over. A failed job keeps its own error and
    /// the release failure is only logged.
    pub fn release_after<T, E>(self, outcome: Result<T, E>) -> Result<T, E>
    where
        E: From<LockError>,
    {
        let job = self.job.clone();

        match (outcome, self.release()) {
            (outcome, Ok(())) => outcome,
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(outcome), Err(err)) => {
                error!(job, %err, "failed to release job lock");
                Err(outcome)
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        if let Err(err) = self.coordinator.release(&self.job) {
            error!(job = self.job, %err, "failed to release job lock");
        }
    }
}
