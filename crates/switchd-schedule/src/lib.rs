//! `switchd-schedule`: weekly recurring schedules at minute resolution.
//!
//! # Overview
//!
//! | Type               | Role                                                   |
//! |--------------------|--------------------------------------------------------|
//! | [`Instant`]        | a point in a cyclic 7-day week (Monday 00:00 = 0)      |
//! | [`Interval`]       | closed `[a, b]` range of instants, `a <= b`            |
//! | [`WeightedSchedule`] | sorted, non-overlapping weighted intervals + queries |
//!
//! A schedule answers two questions for a wall-clock moment: which weight
//! is in force ([`WeightedSchedule::current_action_at`]) and when it changes
//! next ([`WeightedSchedule::next_action_at`]). Both look across the week
//! boundary when the answer lies in the previous or the following week.

pub mod error;
pub mod grid;
pub mod instant;
pub mod interval;
pub mod record;
pub mod schedule;

pub use error::{Result, ScheduleError};
pub use grid::SlotSpan;
pub use instant::{week_start, Instant, MINUTES_PER_WEEK};
pub use interval::{Interval, WeightedInterval};
pub use record::{InstantRecord, IntervalRecord, ScheduleRecord};
pub use schedule::{Action, Transition, WeightedSchedule};
