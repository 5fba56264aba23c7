//! # registry-core
//!
//! Reconciliation store for autoscaled entities. An entity becomes ready once
//! it has been both announced as a provisioned instance and seen connecting as
//! an agent; the two signals arrive independently and in either order.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Each CLI invocation is one short-lived
//!   process; concurrency only comes from several processes at once.
//! - **Lock before store**: Nothing opens the database without holding the
//!   interprocess lock (see [`registry::lock`]).
//! - **One commit per command**: A command's writes land together or not at all.
//! - **Stateless between invocations**: The lock marker and the database file
//!   are the only shared state.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use registry_core::{commands, RegistryCommand, RegistrySettings};
//!
//! let settings = RegistrySettings::default();
//! commands::run(&settings, &RegistryCommand::NewInstance(vec!["i-1".into()]), Utc::now())?;
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod process;
pub mod reactor;
pub mod registry;

pub use commands::{run, with_registry, CommandOutcome, RegistryCommand};
pub use config::{load_config, ActionsConfig, RegistryConfig, RegistrySettings};
pub use error::{RegistryError, Result};
pub use reactor::{CommandActions, EntityActions, Reaction};
pub use registry::{
    EntityRecord, LockFile, PurgeUnit, PurgeWindow, ReadinessReport, RegistryStore, Signal,
};
