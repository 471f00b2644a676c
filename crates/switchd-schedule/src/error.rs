use thiserror::Error;

use crate::instant::Instant;
use crate::interval::WeightedInterval;

/// Errors raised while building or loading a weekly schedule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The interval ends before it starts.
    #[error("Invalid interval: {a} is after {b}")]
    InvalidInterval { a: Instant, b: Instant },

    /// The new interval overlaps a stored interval carrying a different weight.
    #[error("Interval {new} overlaps {existing} with a different weight")]
    ConflictingOverlap {
        new: WeightedInterval,
        existing: WeightedInterval,
    },
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
