//! Configuration loading.
//!
//! An optional TOML file supplies defaults for the global options and the
//! argv of the external accept/reconfigure actions:
//!
//! ```toml
//! database_file = "/var/tmp/salt-autoscaling.db"
//! lock_timeout = 30
//!
//! [actions]
//! accept = ["salt-key", "--yes", "--accept"]
//! reconfigure = ["salt", "--async"]
//! ```
//!
//! Explicit CLI flags win over the file, the file wins over built-in defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{RegistryError, Result};

pub const DEFAULT_DATABASE_FILE: &str = "autoscaling.db";
pub const DEFAULT_LOCK_TIMEOUT_SECS: u32 = 30;
pub const CONFIG_ENV: &str = "AUTOSCALE_REGISTRY_CONFIG";

/// Contents of the configuration file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    pub database_file: Option<PathBuf>,
    pub lock_timeout: Option<u32>,
    pub actions: ActionsConfig,
}

/// Argv prefixes for the external actions; the identifier is appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActionsConfig {
    pub accept: Vec<String>,
    pub reconfigure: Vec<String>,
}

/// Resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    pub database_file: PathBuf,
    pub lock_timeout_secs: u32,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            database_file: PathBuf::from(DEFAULT_DATABASE_FILE),
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

impl RegistrySettings {
    /// Layers CLI overrides over the config file over defaults.
    pub fn resolve(
        config: &RegistryConfig,
        database_file: Option<PathBuf>,
        lock_timeout_secs: Option<u32>,
    ) -> Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            database_file: database_file
                .or_else(|| config.database_file.clone())
                .unwrap_or(defaults.database_file),
            lock_timeout_secs: lock_timeout_secs
                .or(config.lock_timeout)
                .unwrap_or(defaults.lock_timeout_secs),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout_secs == 0 {
            return Err(RegistryError::InvalidArgument(
                "lock timeout must be at least 1 second".to_string(),
            ));
        }
        if self.database_file.as_os_str().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "database file path is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default config location: `<config dir>/autoscale-registry/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("autoscale-registry").join("config.toml"))
}

/// Loads the config from `path`, or from the default location.
///
/// A missing file yields defaults. An explicitly named file must exist.
pub fn load_config(path: Option<&Path>) -> Result<RegistryConfig> {
    let config_path = match path {
        Some(path) => {
            if !path.exists() {
                return Err(RegistryError::ConfigMalformed {
                    path: path.to_path_buf(),
                    details: "file does not exist".to_string(),
                });
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(RegistryConfig::default()),
        },
    };

    let content =
        fs_err::read_to_string(&config_path).map_err(|err| RegistryError::ConfigMalformed {
            path: config_path.clone(),
            details: err.to_string(),
        })?;
    let config: RegistryConfig =
        toml::from_str(&content).map_err(|err| RegistryError::ConfigMalformed {
            path: config_path.clone(),
            details: err.to_string(),
        })?;

    tracing::debug!(path = %config_path.display(), "Loaded registry config");
    Ok(config)
}
