//! Core types for the reconciliation registry.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::{RegistryError, Result};

/// The two independent signals that make an entity ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// The autoscaling group announced a provisioned instance.
    Instance,
    /// The entity connected as an agent.
    Connection,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Instance => write!(f, "instance"),
            Signal::Connection => write!(f, "connection"),
        }
    }
}

/// One row of the registry.
///
/// A record only exists once at least one signal has been observed for its
/// identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub identifier: String,
    pub instance_at: Option<DateTime<Utc>>,
    pub connection_at: Option<DateTime<Utc>>,
}

impl EntityRecord {
    /// A fresh record carrying a single observed signal.
    pub fn observed(identifier: &str, signal: Signal, at: DateTime<Utc>) -> Self {
        let mut record = Self {
            identifier: identifier.to_string(),
            instance_at: None,
            connection_at: None,
        };
        record.observe(signal, at);
        record
    }

    /// Overwrites the timestamp for `signal`; the other one is left alone.
    pub fn observe(&mut self, signal: Signal, at: DateTime<Utc>) {
        match signal {
            Signal::Instance => self.instance_at = Some(at),
            Signal::Connection => self.connection_at = Some(at),
        }
    }
}

/// Result of a readiness check, including the pending report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessReport {
    /// The checked identifier.
    pub identifier: String,
    /// Whether the checked identifier has both signals.
    pub ready: bool,
    /// Announced as instances, never connected. Sorted.
    pub awaiting_connection: Vec<String>,
    /// Connected, never announced as instances. Sorted.
    pub awaiting_instance: Vec<String>,
}

/// Unit of a purge window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl PurgeUnit {
    const fn seconds(self) -> u64 {
        match self {
            PurgeUnit::Seconds => 1,
            PurgeUnit::Minutes => 60,
            PurgeUnit::Hours => 60 * 60,
            PurgeUnit::Days => 24 * 60 * 60,
            PurgeUnit::Weeks => 7 * 24 * 60 * 60,
        }
    }
}

impl FromStr for PurgeUnit {
    type Err = RegistryError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "seconds" => Ok(PurgeUnit::Seconds),
            "minutes" => Ok(PurgeUnit::Minutes),
            "hours" => Ok(PurgeUnit::Hours),
            "days" => Ok(PurgeUnit::Days),
            "weeks" => Ok(PurgeUnit::Weeks),
            other => Err(RegistryError::InvalidArgument(format!(
                "unknown purge unit '{}' (expected seconds, minutes, hours, days or weeks)",
                other
            ))),
        }
    }
}

/// How far back records are kept by a purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeWindow {
    pub amount: u64,
    pub unit: PurgeUnit,
}

impl PurgeWindow {
    pub fn new(amount: u64, unit: PurgeUnit) -> Self {
        Self { amount, unit }
    }

    /// The window as a duration, rejecting values chrono cannot represent.
    pub fn duration(&self) -> Result<Duration> {
        let too_large = || {
            RegistryError::InvalidArgument(format!(
                "purge window {} {:?} is too large",
                self.amount, self.unit
            ))
        };
        let secs = self
            .amount
            .checked_mul(self.unit.seconds())
            .and_then(|secs| i64::try_from(secs).ok())
            .ok_or_else(too_large)?;
        Duration::try_seconds(secs).ok_or_else(too_large)
    }

    /// `now` minus the window.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let duration = self.duration()?;
        now.checked_sub_signed(duration).ok_or_else(|| {
            RegistryError::InvalidArgument(format!(
                "purge window {} {:?} reaches before the supported time range",
                self.amount, self.unit
            ))
        })
    }
}
