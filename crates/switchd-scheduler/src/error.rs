use switchd_core::{Mode, SwitchId};
use switchd_schedule::ScheduleError;
use thiserror::Error;

/// Errors returned by dispatcher operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No switch with this id is configured.
    #[error("Switch not found: {id}")]
    UnknownSwitch { id: SwitchId },

    /// The switch has no schedule with this name.
    #[error("Schedule not found: {name} (switch {switch})")]
    UnknownSchedule { switch: SwitchId, name: String },

    /// A schedule with this name already exists on the switch.
    #[error("Schedule already exists: {name} (switch {switch})")]
    DuplicateSchedule { switch: SwitchId, name: String },

    #[error("Unsupported mode: {mode}")]
    UnsupportedMode { mode: Mode },

    /// A level or schedule weight outside `0..=levels`.
    #[error("Invalid level {level} for switch {switch} (max {max})")]
    InvalidLevel { switch: SwitchId, level: i64, max: i64 },

    #[error("Invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),

    /// A switch references an actuator that was never registered.
    #[error("Actuator not found: {name}")]
    UnknownActuator { name: String },

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The dispatcher task is gone.
    #[error("Dispatcher stopped")]
    Stopped,
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::UnknownSwitch { .. } => "UNKNOWN_SWITCH",
            DispatchError::UnknownSchedule { .. } => "UNKNOWN_SCHEDULE",
            DispatchError::DuplicateSchedule { .. } => "DUPLICATE_SCHEDULE",
            DispatchError::UnsupportedMode { .. } => "UNSUPPORTED_MODE",
            DispatchError::InvalidLevel { .. } => "INVALID_LEVEL",
            DispatchError::Schedule(_) => "INVALID_SCHEDULE",
            DispatchError::UnknownActuator { .. } => "UNKNOWN_ACTUATOR",
            DispatchError::Database(_) => "DATABASE_ERROR",
            DispatchError::Serialization(_) => "SERIALIZATION_ERROR",
            DispatchError::Stopped => "STOPPED",
        }
    }

    /// The mutation was applied in memory but could not be written to the store.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            DispatchError::Database(_) | DispatchError::Serialization(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
