//! Persistent run bookkeeping kept next to the ledger.
//!
//! - `state.json` holds the last-run timestamp for `autosync status`
//! - `run.lock` is the optional advisory lock guarding against overlapping runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

pub const STATE_FILE: &str = "state.json";
pub const LOCK_FILE: &str = "run.lock";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum StateError {
    #[error("State file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("State file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub last_run: Option<DateTime<Utc>>,
}

impl RunState {
    /// Reads the state file; missing or unreadable state counts as "never run".
    pub fn load(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt run state");
                    Self::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read run state");
                Self::default()
            }
        }
    }

    /// Writes the state through a temp file and rename, so readers never see
    /// a half-written file. Each writer gets its own temp file.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.{}.{seq}.tmp", std::process::id()));
        let written = std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)
            .and_then(|()| std::fs::rename(&tmp, path));
        if written.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        Ok(written?)
    }

    /// Stamps `now` as the last run and persists it.
    pub fn record_run(path: &Path, now: DateTime<Utc>) -> Result<Self, StateError> {
        let state = Self { last_run: Some(now) };
        state.save(path)?;
        Ok(state)
    }

    /// When the next scheduled run is due, given the polling interval.
    pub fn next_due(&self, interval: Duration) -> Option<DateTime<Utc>> {
        let interval = chrono::Duration::from_std(interval).ok()?;
        self.last_run.map(|last| last + interval)
    }
}

/// Advisory lock marking a run in progress. Removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Takes the lock at `path`.
    ///
    /// Returns `Ok(None)` when another run holds a lock younger than `ttl`.
    /// An older lock is treated as abandoned and taken over.
    pub fn acquire(path: &Path, ttl: Duration) -> Result<Option<Self>, StateError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        for _ in 0..2 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(mut file) => {
                    writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339())?;
                    return Ok(Some(Self {
                        path: path.to_path_buf(),
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let age = std::fs::metadata(path)?
                        .modified()?
                        .elapsed()
                        .unwrap_or_default();
                    if age < ttl {
                        return Ok(None);
                    }
                    tracing::warn!(
                        path = %path.display(),
                        age_secs = age.as_secs(),
                        "Taking over stale run lock"
                    );
                    match std::fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(StateError::Io(e)),
                    }
                }
                Err(e) => return Err(StateError::Io(e)),
            }
        }
        // Lost the takeover race to another run.
        Ok(None)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}
