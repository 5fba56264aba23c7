//! Reconciliation Registry
//!
//! Merges two independently arriving signals about the same entity into one
//! readiness record.
//!
//! ```text
//! autoscaling group ──new-instance──┐
//!                                   ├─→ lock → store → ready?
//! agent connects ─────new-minion────┘
//! ```
//!
//! # Module Structure
//!
//! - [`lock`]: Interprocess lock marker with stale-owner takeover
//! - [`store`]: SQLite table of per-entity signal timestamps
//! - [`types`]: Records, signals, readiness reports and purge windows
//!
//! The lock and the store know nothing about each other. They compose only
//! through [`crate::commands::with_registry`], which takes the lock, opens the
//! store, runs one operation and releases the lock on every exit path.

pub mod lock;
pub mod store;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use lock::{lock_path_for, LockFile};
pub use store::RegistryStore;
pub use types::{EntityRecord, PurgeUnit, PurgeWindow, ReadinessReport, Signal};
