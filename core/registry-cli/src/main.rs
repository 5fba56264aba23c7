//! autoscale-registry: tracks autoscaled entities until they can be accepted.
//!
//! An entity may be accepted once two separate events have happened:
//!
//! 1. `new-instance`: the autoscaling group published that the instance will
//!    connect.
//! 2. `new-minion`: the entity connected as an agent.
//!
//! `check` exits 0 only once both were recorded, so the caller can use it to
//! gate the accept step.
//!
//! ## Subcommands
//!
//! - `new-instance INSTANCE...`: record instance announcements
//! - `new-minion MINION...`: record agent connections
//! - `check INSTANCE`: report pending entities, exit 0 if INSTANCE is ready
//! - `purge DURATION UNIT`: delete records older than the window
//! - `react ...`: run a whole trigger flow, including the external action

mod logging;

use chrono::Utc;
use clap::{Parser, Subcommand};
use registry_core::config::CONFIG_ENV;
use registry_core::{
    commands, load_config, reactor, CommandActions, CommandOutcome, PurgeUnit, PurgeWindow,
    Reaction, ReadinessReport, RegistryCommand, RegistryError, RegistrySettings,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "autoscale-registry")]
#[command(about = "A small database of entities to be accepted")]
#[command(version)]
struct Cli {
    /// SQLite database where data is stored [default: autoscaling.db]
    #[arg(long, value_name = "PATH", global = true)]
    database_file: Option<PathBuf>,

    /// Number of seconds to wait for the exclusive database lock [default: 30]
    #[arg(
        long,
        value_name = "SECONDS",
        global = true,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    lock_timeout: Option<u32>,

    /// TOML configuration file
    #[arg(long, value_name = "PATH", global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register newly started instance(s)
    NewInstance {
        /// Instance(s) to be added
        #[arg(value_name = "INSTANCE", required = true)]
        instances: Vec<String>,
    },

    /// Register newly connected minion(s)
    NewMinion {
        /// Minion(s) to be added
        #[arg(value_name = "MINION", required = true)]
        minions: Vec<String>,
    },

    /// Check if an instance is registered both as instance and as minion.
    /// Also logs pending entities. Exits 0 if ready, 1 otherwise.
    Check {
        /// Instance to check
        #[arg(value_name = "INSTANCE")]
        instance: String,
    },

    /// Purge older records from the database
    Purge {
        /// Time duration
        #[arg(value_name = "DURATION")]
        duration: u64,

        /// Unit of DURATION: seconds, minutes, hours, days or weeks
        #[arg(value_name = "UNIT")]
        unit: PurgeUnit,
    },

    /// Run a trigger flow: record, check, then act if ready
    React {
        #[command(subcommand)]
        trigger: Trigger,
    },
}

#[derive(Subcommand)]
enum Trigger {
    /// An instance was announced; accept it if its minion already connected
    InstanceAnnounced {
        #[arg(value_name = "INSTANCE")]
        instance: String,
    },

    /// A minion connected; accept it if its instance was already announced
    EntityConnected {
        #[arg(value_name = "MINION")]
        minion: String,
    },

    /// A minion was accepted; start reconfiguring it if it is ready
    EntityAccepted {
        #[arg(value_name = "MINION")]
        minion: String,
    },
}

fn main() -> ExitCode {
    let _logging_guard = logging::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version go to stdout and are not failures.
            let code = if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            let _ = err.print();
            return code;
        }
    };

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "autoscale-registry failed");
            if err.is_lock_timeout() {
                eprintln!("Could not take lock.");
            }
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, RegistryError> {
    let config = load_config(cli.config.as_deref())?;
    let settings = RegistrySettings::resolve(&config, cli.database_file, cli.lock_timeout)?;

    let command = match cli.command {
        Commands::NewInstance { instances } => RegistryCommand::NewInstance(instances),
        Commands::NewMinion { minions } => RegistryCommand::NewMinion(minions),
        Commands::Check { instance } => RegistryCommand::Check(instance),
        Commands::Purge { duration, unit } => {
            RegistryCommand::Purge(PurgeWindow::new(duration, unit))
        }
        Commands::React { trigger } => {
            let actions = CommandActions::new(&config.actions);
            return react(&settings, &actions, trigger);
        }
    };

    let outcome = commands::run(&settings, &command, Utc::now())?;
    Ok(render(&outcome))
}

fn render(outcome: &CommandOutcome) -> ExitCode {
    match outcome {
        CommandOutcome::Recorded { .. } => ExitCode::SUCCESS,
        CommandOutcome::Readiness(report) => {
            print_pending(report);
            if report.ready {
                println!("The entity can be accepted.");
                ExitCode::SUCCESS
            } else {
                println!("The entity is NOT ready for acceptance.");
                ExitCode::FAILURE
            }
        }
        CommandOutcome::Purged { removed } => {
            println!("Deleted {} rows.", removed);
            ExitCode::SUCCESS
        }
    }
}

fn print_pending(report: &ReadinessReport) {
    for id in &report.awaiting_connection {
        println!("Pending entity registered as instance, but not as minion: {}", id);
    }
    for id in &report.awaiting_instance {
        println!("Pending entity registered as minion, but not as instance: {}", id);
    }
}

fn react(
    settings: &RegistrySettings,
    actions: &CommandActions,
    trigger: Trigger,
) -> Result<ExitCode, RegistryError> {
    let (reaction, verb): (Reaction, &str) = match trigger {
        Trigger::InstanceAnnounced { instance } => (
            reactor::instance_announced(settings, actions, &instance)?,
            "Accepted",
        ),
        Trigger::EntityConnected { minion } => (
            reactor::entity_connected(settings, actions, &minion)?,
            "Accepted",
        ),
        Trigger::EntityAccepted { minion } => (
            reactor::entity_accepted(settings, actions, &minion)?,
            "Reconfiguring",
        ),
    };

    print_pending(&reaction.report);
    if reaction.action_taken {
        println!("{} entity: {}", verb, reaction.report.identifier);
    } else {
        println!(
            "The entity is NOT ready for acceptance: {}",
            reaction.report.identifier
        );
    }
    Ok(ExitCode::SUCCESS)
}
