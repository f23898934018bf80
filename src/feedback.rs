//! Feedback lock: keeps the receiver from hearing our own transmission
//!
//! A cross-process exclusion primitive shared between the transmitter
//! (which holds it for the duration of each playback) and the receiver
//! (which discards captured audio while it is held). Backed by a lock
//! file created atomically with `create_new`; the file records the
//! holder pid and acquisition time.
//!
//! Staleness guard: a lock held longer than the configured maximum means
//! playback hung or the holder crashed. Both sides force-release it and
//! log the fault, so a dead transmitter can never permanently deafen the
//! capture side.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Poll interval while waiting to acquire
const ACQUIRE_RETRY: Duration = Duration::from_millis(100);

/// Lock file payload
#[derive(Debug, Deserialize, Serialize)]
struct LockInfo {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// File-backed exclusive lock with a staleness guard
#[derive(Debug, Clone)]
pub struct FeedbackLock {
    path: PathBuf,
    stale_after: Duration,
}

impl FeedbackLock {
    /// Create a handle on the lock file path
    #[must_use]
    pub fn new(path: &Path, stale_secs: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            stale_after: Duration::from_secs(stale_secs),
        }
    }

    /// Acquire the lock, waiting for the current holder if necessary
    ///
    /// A stale holder is force-released (logged as a fault) rather than
    /// waited on. Acquisition is exclusive and non-nested; the returned
    /// guard releases on drop.
    ///
    /// # Errors
    ///
    /// Returns error on IO failure creating the lock file.
    pub async fn acquire(&self) -> Result<LockGuard> {
        loop {
            match self.try_acquire()? {
                Some(guard) => return Ok(guard),
                None => {
                    self.release_if_stale();
                    tokio::time::sleep(ACQUIRE_RETRY).await;
                }
            }
        }
    }

    /// Attempt a single non-blocking acquisition
    ///
    /// # Errors
    ///
    /// Returns error on IO failure other than the lock already existing.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => {
                serde_json::to_writer(file, &info)?;
                tracing::debug!(path = %self.path.display(), "feedback lock acquired");
                Ok(Some(LockGuard { path: self.path.clone() }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the lock is currently held
    ///
    /// The capture side calls this before processing audio. A stale lock
    /// is force-released here and reported as not held.
    #[must_use]
    pub fn is_held(&self) -> bool {
        if !self.path.exists() {
            return false;
        }
        if self.release_if_stale() {
            return false;
        }
        true
    }

    /// Remove a lock file left behind by a previous run
    ///
    /// Called at transmitter startup; holding a lock across process
    /// restart is never valid.
    pub fn clear_startup_leftover(&self) {
        if !self.path.exists() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::warn!(path = %self.path.display(), "removed leftover lock file on startup");
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "failed to remove leftover lock");
            }
        }
    }

    /// Force-release the lock if held past the staleness bound
    ///
    /// Returns true if a stale lock was released.
    fn release_if_stale(&self) -> bool {
        let Some(age) = self.held_for() else {
            return false;
        };
        if age < self.stale_after {
            return false;
        }
        tracing::error!(
            path = %self.path.display(),
            held_secs = age.as_secs(),
            "stale feedback lock force-released"
        );
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::error!(error = %e, "failed to remove stale lock");
            return false;
        }
        true
    }

    /// How long the current holder has held the lock
    ///
    /// An unreadable payload counts as stale; a lock we cannot date is a
    /// lock we cannot trust.
    fn held_for(&self) -> Option<Duration> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<LockInfo>(&raw) {
            Ok(info) => Utc::now()
                .signed_duration_since(info.acquired_at)
                .to_std()
                .ok()
                .or(Some(Duration::ZERO)),
            Err(_) => Some(self.stale_after),
        }
    }
}

/// Holds the feedback lock; releases on drop
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::error!(path = %self.path.display(), error = %e, "failed to release feedback lock");
        } else {
            tracing::debug!(path = %self.path.display(), "feedback lock released");
        }
    }
}
