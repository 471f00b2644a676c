//! `switchd-core`: configuration, the top-level error type and the ids and
//! modes shared by every switchd crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ActuatorConfig, DispatcherConfig, SwitchConfig, SwitchdConfig, LOG_ACTUATOR};
pub use error::{Result, SwitchdError};
pub use types::{Mode, SwitchId};
