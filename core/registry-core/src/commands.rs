//! The four registry commands and the lock-scoped session they run in.
//!
//! Each invocation follows the same sequence:
//!
//! ```text
//! validate args → acquire lock → open store → one operation → commit → release lock
//! ```
//!
//! Arguments are validated before the lock is attempted. The lock is released
//! on every exit path once acquired; [`LockFile`] also releases on drop.

use chrono::{DateTime, Utc};

use crate::config::RegistrySettings;
use crate::error::{RegistryError, Result};
use crate::registry::{
    lock_path_for, LockFile, PurgeWindow, ReadinessReport, RegistryStore, Signal,
};

/// One registry operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCommand {
    /// Instances announced by the autoscaling group.
    NewInstance(Vec<String>),
    /// Agents that connected.
    NewMinion(Vec<String>),
    /// Readiness of one identifier plus the pending report.
    Check(String),
    /// Drop records older than the window.
    Purge(PurgeWindow),
}

/// What a command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Recorded { signal: Signal, count: usize },
    Readiness(ReadinessReport),
    Purged { removed: u64 },
}

impl RegistryCommand {
    /// Rejects malformed input. Runs before any lock is taken.
    pub fn validate(&self) -> Result<()> {
        match self {
            RegistryCommand::NewInstance(ids) | RegistryCommand::NewMinion(ids) => {
                if ids.is_empty() {
                    return Err(RegistryError::InvalidArgument(
                        "at least one identifier is required".to_string(),
                    ));
                }
                ids.iter().try_for_each(|id| validate_identifier(id))
            }
            RegistryCommand::Check(id) => validate_identifier(id),
            RegistryCommand::Purge(window) => window.duration().map(|_| ()),
        }
    }
}

fn validate_identifier(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(RegistryError::InvalidArgument(
            "identifier must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Runs `op` against the store with the registry lock held.
pub fn with_registry<T>(
    settings: &RegistrySettings,
    op: impl FnOnce(&mut RegistryStore) -> Result<T>,
) -> Result<T> {
    let lock_path = lock_path_for(&settings.database_file);
    let lock = LockFile::acquire(&lock_path, settings.lock_timeout_secs)?;

    // On any error below the lock is dropped, and thereby released.
    let value =
        RegistryStore::open(&settings.database_file).and_then(|mut store| op(&mut store))?;
    lock.release()?;
    Ok(value)
}

/// Validates and runs one command at `now`.
pub fn run(
    settings: &RegistrySettings,
    command: &RegistryCommand,
    now: DateTime<Utc>,
) -> Result<CommandOutcome> {
    settings.validate()?;
    command.validate()?;

    // Resolve the cutoff up front so a bad window never takes the lock.
    let cutoff = match command {
        RegistryCommand::Purge(window) => Some(window.cutoff(now)?),
        _ => None,
    };

    let outcome = with_registry(settings, |store| match command {
        RegistryCommand::NewInstance(ids) => {
            store.record_instances(ids, now)?;
            Ok(CommandOutcome::Recorded {
                signal: Signal::Instance,
                count: ids.len(),
            })
        }
        RegistryCommand::NewMinion(ids) => {
            store.record_connections(ids, now)?;
            Ok(CommandOutcome::Recorded {
                signal: Signal::Connection,
                count: ids.len(),
            })
        }
        RegistryCommand::Check(id) => store.check_readiness(id).map(CommandOutcome::Readiness),
        RegistryCommand::Purge(_) => {
            let cutoff = cutoff.unwrap_or(now);
            store
                .purge_stale(cutoff)
                .map(|removed| CommandOutcome::Purged { removed })
        }
    })?;

    match &outcome {
        CommandOutcome::Recorded { signal, count } => {
            tracing::info!(signal = %signal, count, "Signals recorded");
        }
        CommandOutcome::Readiness(report) => {
            tracing::info!(
                identifier = %report.identifier,
                ready = report.ready,
                awaiting_connection = report.awaiting_connection.len(),
                awaiting_instance = report.awaiting_instance.len(),
                "Readiness checked"
            );
        }
        CommandOutcome::Purged { removed } => {
            tracing::info!(removed, "Stale records purged");
        }
    }

    Ok(outcome)
}
