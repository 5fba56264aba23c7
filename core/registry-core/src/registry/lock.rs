//! Interprocess lock file guarding the registry database.
//!
//! Every command runs with this lock held. The lock is a plain marker file
//! next to the database that is created exclusively and holds the decimal PID
//! of the owner.
//!
//! # Marker Layout
//!
//! ```text
//! autoscaling.db        # the registry database
//! autoscaling.db.lock   # plain text: PID of the current holder
//! ```
//!
//! # Acquisition
//!
//! One exclusive create is attempted per round, for at most `timeout_secs`
//! rounds. When the marker already exists its owner is probed:
//!
//! 1. **Owner alive**: sleep one second, next round.
//! 2. **Owner dead, or marker unreadable/not a PID**: delete the marker and go
//!    straight to the next round without sleeping.
//!
//! A stale marker is only discovered by a contending process. Nothing sweeps
//! for them in the background.
//!
//! # Stale Takeover Race
//!
//! Deleting a stale marker and recreating it are two separate steps. A third
//! process can win the create in between, or can delete a marker that was
//! freshly recreated after it observed the stale one. This is best-effort
//! mutual exclusion for a single-host, low-contention tool, and the timeout
//! and retry numbers are tuned for it. Do not tighten it here.

use fs_err as fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::error::{RegistryError, Result};
use crate::process::{current_pid, is_pid_alive};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Returns the lock marker path for a database file (`<database>.lock`).
pub fn lock_path_for(database_file: &Path) -> PathBuf {
    let mut path = database_file.as_os_str().to_owned();
    path.push(".lock");
    PathBuf::from(path)
}

/// A held registry lock. Released on [`LockFile::release`] or on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    held: bool,
}

impl LockFile {
    /// Acquires the lock at `path`, trying at most `timeout_secs` times.
    pub fn acquire(path: &Path, timeout_secs: u32) -> Result<Self> {
        Self::acquire_with_interval(path, timeout_secs, POLL_INTERVAL)
    }

    pub(crate) fn acquire_with_interval(
        path: &Path,
        timeout_secs: u32,
        interval: Duration,
    ) -> Result<Self> {
        let pid = current_pid();

        for attempt in 1..=timeout_secs {
            if try_create_marker(path, pid)? {
                tracing::debug!(path = %path.display(), pid, attempt, "Lock acquired");
                return Ok(Self {
                    path: path.to_path_buf(),
                    held: true,
                });
            }

            match read_owner(path) {
                Some(owner) if is_pid_alive(owner) => {
                    tracing::debug!(
                        path = %path.display(),
                        owner,
                        attempt,
                        "Lock held by live process, waiting"
                    );
                    thread::sleep(interval);
                }
                owner => {
                    tracing::warn!(
                        path = %path.display(),
                        owner = ?owner,
                        "Removing stale lock marker"
                    );
                    invalidate(path)?;
                }
            }
        }

        Err(RegistryError::LockTimeout {
            path: path.to_path_buf(),
            timeout_secs,
        })
    }

    /// Path of the marker file this lock owns.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock, surfacing any failure to remove the marker.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        invalidate(&self.path)?;
        tracing::debug!(path = %self.path.display(), "Lock released");
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            tracing::warn!(error = %err, "Failed to release lock marker");
        }
    }
}

/// Exclusively creates the marker and writes `pid` into it.
///
/// Returns `Ok(false)` when the marker already exists.
fn try_create_marker(path: &Path, pid: u32) -> Result<bool> {
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => return Err(RegistryError::io("Failed to create lock marker")(err)),
    };

    let written = file
        .write_all(pid.to_string().as_bytes())
        .and_then(|()| file.sync_all());
    if let Err(err) = written {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(RegistryError::io("Failed to write lock marker")(err));
    }

    Ok(true)
}

/// Reads the owner PID. `None` for a missing, unreadable or malformed marker.
fn read_owner(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    content.trim().parse().ok()
}

fn invalidate(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(RegistryError::io("Failed to remove lock marker")(err)),
    }
}
