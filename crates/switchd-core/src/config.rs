use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SwitchdError};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_COMMAND_BUFFER: usize = 64;
/// Name of the actuator that is always available.
pub const LOG_ACTUATOR: &str = "log";

/// Top-level config (switchd.toml + SWITCHD_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchdConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub actuators: BTreeMap<String, ActuatorConfig>,
    #[serde(default)]
    pub switches: BTreeMap<String, SwitchConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Upper bound on a single sleep before the wall clock is re-read.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Capacity of the command channel into the dispatcher task.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

/// How a named actuator drives its switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActuatorConfig {
    /// Only emits tracing events.
    Log,
    /// Runs a shell command per transition. `{switch}` and `{level}` are
    /// substituted before the command is spawned.
    Command { on: String, off: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Display name.
    pub name: String,
    /// Highest level; a plain on/off relay has 1.
    #[serde(default = "default_levels")]
    pub levels: i64,
    #[serde(default = "default_actuator")]
    pub actuator: String,
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.switchd/switchd.db", home)
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_command_buffer() -> usize {
    DEFAULT_COMMAND_BUFFER
}
fn default_levels() -> i64 {
    1
}
fn default_actuator() -> String {
    LOG_ACTUATOR.to_string()
}

impl SwitchdConfig {
    /// Load config from a TOML file with SWITCHD_* env var overrides.
    ///
    /// The file is, in order: the explicit path, `$SWITCHD_CONFIG`, then
    /// `~/.switchd/switchd.toml`. A missing file is not an error; env vars
    /// and defaults still apply. Nested keys use `__`, e.g.
    /// `SWITCHD_DISPATCHER__POLL_INTERVAL_SECS=1`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("SWITCHD_CONFIG").ok())
            .unwrap_or_else(default_config_path);
        debug!(path = %path, "loading configuration");

        let config: SwitchdConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SWITCHD_").split("__"))
            .extract()
            .map_err(|e| SwitchdError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate an in-memory TOML document, without env overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: SwitchdConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| SwitchdError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross references and ranges that serde alone cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.poll_interval_secs == 0 {
            return Err(SwitchdError::Config(
                "dispatcher.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.dispatcher.command_buffer == 0 {
            return Err(SwitchdError::Config(
                "dispatcher.command_buffer must be at least 1".to_string(),
            ));
        }
        for (id, switch) in &self.switches {
            if switch.levels < 1 {
                return Err(SwitchdError::Config(format!(
                    "switch '{id}': levels must be at least 1, got {}",
                    switch.levels
                )));
            }
            if switch.actuator != LOG_ACTUATOR && !self.actuators.contains_key(&switch.actuator) {
                return Err(SwitchdError::Config(format!(
                    "switch '{id}': unknown actuator '{}'",
                    switch.actuator
                )));
            }
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.switchd/switchd.toml", home)
}
