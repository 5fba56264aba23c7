//! Reactions to the two external triggers.
//!
//! The automation layer calls one of these when it sees an event:
//!
//! ```text
//! instance announced  → new-instance → check → accept if ready
//! entity connected    → new-minion   → check → accept if ready
//! entity accepted     →                check → reconfigure (async) if ready
//! ```
//!
//! Every step is its own lock-scoped registry command, exactly as if the CLI
//! had been invoked once per step. Whichever trigger arrives second sees the
//! entity ready and performs the accept.

use chrono::Utc;
use std::process::{Command, Stdio};

use crate::commands::{self, CommandOutcome, RegistryCommand};
use crate::config::{ActionsConfig, RegistrySettings};
use crate::error::{RegistryError, Result};
use crate::registry::ReadinessReport;

/// External actions taken on a ready entity.
pub trait EntityActions {
    /// Accept the entity. Must complete before returning.
    fn accept(&self, identifier: &str) -> Result<()>;

    /// Start reconfiguring the entity without waiting for it to finish.
    fn reconfigure(&self, identifier: &str) -> Result<()>;
}

/// What a reaction ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub report: ReadinessReport,
    pub action_taken: bool,
}

/// An instance was announced by the autoscaling group.
pub fn instance_announced(
    settings: &RegistrySettings,
    actions: &dyn EntityActions,
    identifier: &str,
) -> Result<Reaction> {
    record_then_accept(
        settings,
        actions,
        RegistryCommand::NewInstance(vec![identifier.to_string()]),
        identifier,
    )
}

/// An agent connected.
pub fn entity_connected(
    settings: &RegistrySettings,
    actions: &dyn EntityActions,
    identifier: &str,
) -> Result<Reaction> {
    record_then_accept(
        settings,
        actions,
        RegistryCommand::NewMinion(vec![identifier.to_string()]),
        identifier,
    )
}

/// An entity was accepted; reconfigure it if the registry agrees it is ours.
pub fn entity_accepted(
    settings: &RegistrySettings,
    actions: &dyn EntityActions,
    identifier: &str,
) -> Result<Reaction> {
    let report = check(settings, identifier)?;
    let action_taken = report.ready;
    if action_taken {
        actions.reconfigure(identifier)?;
        tracing::info!(identifier, "Reconfigure started");
    }
    Ok(Reaction {
        report,
        action_taken,
    })
}

fn record_then_accept(
    settings: &RegistrySettings,
    actions: &dyn EntityActions,
    record: RegistryCommand,
    identifier: &str,
) -> Result<Reaction> {
    commands::run(settings, &record, Utc::now())?;

    let report = check(settings, identifier)?;
    let action_taken = report.ready;
    if action_taken {
        actions.accept(identifier)?;
        tracing::info!(identifier, "Entity accepted");
    }
    Ok(Reaction {
        report,
        action_taken,
    })
}

fn check(settings: &RegistrySettings, identifier: &str) -> Result<ReadinessReport> {
    match commands::run(
        settings,
        &RegistryCommand::Check(identifier.to_string()),
        Utc::now(),
    )? {
        CommandOutcome::Readiness(report) => Ok(report),
        other => Err(RegistryError::ActionFailed {
            action: "check".to_string(),
            details: format!("unexpected outcome {:?}", other),
        }),
    }
}

/// Runs configured argv prefixes with the identifier appended.
///
/// An empty argv means the action is not configured; it is logged and skipped.
#[derive(Debug, Clone, Default)]
pub struct CommandActions {
    accept: Vec<String>,
    reconfigure: Vec<String>,
}

impl CommandActions {
    pub fn new(config: &ActionsConfig) -> Self {
        Self {
            accept: config.accept.clone(),
            reconfigure: config.reconfigure.clone(),
        }
    }

    fn command(argv: &[String], identifier: &str) -> Option<Command> {
        let (program, args) = argv.split_first()?;
        let mut command = Command::new(program);
        command.args(args).arg(identifier).stdin(Stdio::null());
        Some(command)
    }
}

impl EntityActions for CommandActions {
    fn accept(&self, identifier: &str) -> Result<()> {
        let Some(mut command) = Self::command(&self.accept, identifier) else {
            tracing::warn!(identifier, "No accept action configured; skipping");
            return Ok(());
        };

        let status = command.status().map_err(|err| RegistryError::ActionFailed {
            action: "accept".to_string(),
            details: err.to_string(),
        })?;
        if !status.success() {
            return Err(RegistryError::ActionFailed {
                action: "accept".to_string(),
                details: format!("exited with {}", status),
            });
        }
        Ok(())
    }

    fn reconfigure(&self, identifier: &str) -> Result<()> {
        let Some(mut command) = Self::command(&self.reconfigure, identifier) else {
            tracing::warn!(identifier, "No reconfigure action configured; skipping");
            return Ok(());
        };

        let child = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| RegistryError::ActionFailed {
                action: "reconfigure".to_string(),
                details: err.to_string(),
            })?;
        tracing::debug!(identifier, pid = child.id(), "Reconfigure spawned");
        Ok(())
    }
}
