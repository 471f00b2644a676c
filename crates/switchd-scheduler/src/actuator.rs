use std::collections::HashMap;
use std::sync::Arc;

use switchd_core::{ActuatorConfig, SwitchId, SwitchdConfig, LOG_ACTUATOR};
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// Errors raised by an actuator. They are logged by the dispatcher and never
/// change switch state.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("Actuation failed: {0}")]
    Failed(String),

    #[error("Failed to spawn command: {0}")]
    Spawn(String),
}

/// The physical side of a switch: relays, GPIO lines, remote APIs.
///
/// Calls must not block; slow work belongs in a spawned task.
pub trait Actuator: Send + Sync {
    /// Key under which the actuator is registered.
    fn name(&self) -> &str;

    /// Turn the switch on at `level` (always at least 1).
    fn activate(&self, switch: &SwitchId, level: i64) -> Result<(), ActuatorError>;

    fn deactivate(&self, switch: &SwitchId) -> Result<(), ActuatorError>;
}

/// Emits a tracing event per transition and touches no hardware.
pub struct LogActuator {
    name: String,
}

impl LogActuator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Actuator for LogActuator {
    fn name(&self) -> &str {
        &self.name
    }

    fn activate(&self, switch: &SwitchId, level: i64) -> Result<(), ActuatorError> {
        info!(actuator = %self.name, %switch, level, "switch on");
        Ok(())
    }

    fn deactivate(&self, switch: &SwitchId) -> Result<(), ActuatorError> {
        info!(actuator = %self.name, %switch, "switch off");
        Ok(())
    }
}

/// Runs `sh -c <template>` per transition, with `{switch}` and `{level}`
/// substituted. The exit status is logged from a background task.
pub struct CommandActuator {
    name: String,
    on: String,
    off: String,
}

impl CommandActuator {
    pub fn new(name: &str, on: &str, off: &str) -> Self {
        Self {
            name: name.to_string(),
            on: on.to_string(),
            off: off.to_string(),
        }
    }

    fn spawn(&self, switch: &SwitchId, template: &str, level: i64) -> Result<(), ActuatorError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ActuatorError::Spawn(e.to_string()))?;
        let command = render(template, switch, level);
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .spawn()
            .map_err(|e| ActuatorError::Spawn(e.to_string()))?;

        let actuator = self.name.clone();
        let switch = switch.clone();
        runtime.spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    info!(%actuator, %switch, %command, "command finished");
                }
                Ok(status) => {
                    warn!(%actuator, %switch, %command, %status, "command failed");
                }
                Err(e) => {
                    warn!(%actuator, %switch, %command, error = %e, "command wait failed");
                }
            }
        });
        Ok(())
    }
}

impl Actuator for CommandActuator {
    fn name(&self) -> &str {
        &self.name
    }

    fn activate(&self, switch: &SwitchId, level: i64) -> Result<(), ActuatorError> {
        self.spawn(switch, &self.on, level)
    }

    fn deactivate(&self, switch: &SwitchId) -> Result<(), ActuatorError> {
        self.spawn(switch, &self.off, 0)
    }
}

fn render(template: &str, switch: &SwitchId, level: i64) -> String {
    template
        .replace("{switch}", switch.as_str())
        .replace("{level}", &level.to_string())
}

/// Named actuators available to switches. A `log` actuator is always present.
pub struct ActuatorRegistry {
    actuators: HashMap<String, Arc<dyn Actuator>>,
}

impl ActuatorRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            actuators: HashMap::new(),
        };
        registry.register(Arc::new(LogActuator::new(LOG_ACTUATOR)));
        registry
    }

    /// Build every `[actuators.*]` entry of `config`.
    pub fn from_config(config: &SwitchdConfig) -> Self {
        let mut registry = Self::new();
        for (name, actuator) in &config.actuators {
            let actuator: Arc<dyn Actuator> = match actuator {
                ActuatorConfig::Log => Arc::new(LogActuator::new(name)),
                ActuatorConfig::Command { on, off } => {
                    Arc::new(CommandActuator::new(name, on, off))
                }
            };
            registry.register(actuator);
        }
        registry
    }

    /// Register an actuator, replacing one with the same name.
    pub fn register(&mut self, actuator: Arc<dyn Actuator>) {
        let name = actuator.name().to_string();
        info!(actuator = %name, "registering actuator");
        self.actuators.insert(name, actuator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Actuator>> {
        self.actuators.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actuators.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ActuatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
