//! `switchd-scheduler`: drives switches from their weekly schedules.
//!
//! # Overview
//!
//! Switch state (mode, level, named schedules, the active schedule) is kept
//! in a SQLite `switches` table. The [`engine::ScheduleDispatcher`] runs as a
//! single Tokio task: it owns every switch, arms one timer at the soonest
//! transition across all of them, applies it through the switch's
//! [`actuator::Actuator`], and re-arms. Requests from a
//! [`handle::DispatcherHandle`] are served in the same loop.
//!
//! # Modes
//!
//! | Mode                    | Follows schedule transitions                 |
//! |-------------------------|----------------------------------------------|
//! | `Auto`                  | yes                                          |
//! | `KeepOn` / `KeepOff`    | released back to `Auto` by the next one      |
//! | `AlwaysOn` / `AlwaysOff`| no, until the mode is set back to `Auto`     |
//! | `Timer`                 | rejected                                     |

pub mod actuator;
pub mod clock;
pub mod db;
pub mod engine;
pub mod error;
pub mod handle;
pub mod state;
pub mod store;

pub use actuator::{Actuator, ActuatorError, ActuatorRegistry, CommandActuator, LogActuator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{FiredEvent, PlannedAction, PlannedEvent, ScheduleDispatcher, SwitchSnapshot, SwitchSpec};
pub use error::{DispatchError, Result};
pub use handle::DispatcherHandle;
pub use state::{SwitchRecord, SwitchState};
pub use store::SwitchStore;
