//! Error types for registry operations.
//!
//! Every failure is local to one invocation. The CLI turns any of these into
//! exit code 1 plus a one-line diagnostic.

use std::path::PathBuf;

/// All errors that can occur while running a registry command.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    // ─────────────────────────────────────────────────────────────────────
    // Gate Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Could not take lock {path} within {timeout_secs} attempts")]
    LockTimeout { path: PathBuf, timeout_secs: u32 },

    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Input Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // External Action Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("External action failed: {action}: {details}")]
    ActionFailed { action: String, details: String },
}

impl RegistryError {
    pub(crate) fn storage(context: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Self {
        let context = context.into();
        move |source| RegistryError::Storage { context, source }
    }

    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| RegistryError::Io { context, source }
    }

    /// True when the gate could not be acquired in time.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, RegistryError::LockTimeout { .. })
    }
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
