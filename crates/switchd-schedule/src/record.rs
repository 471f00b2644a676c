//! Persisted shape of a schedule: `{"intervals": [{"a": {..}, "b": {..}, "w": n}]}`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::instant::Instant;
use crate::interval::WeightedInterval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantRecord {
    pub day: i64,
    pub hour: i64,
    pub minute: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalRecord {
    pub a: InstantRecord,
    pub b: InstantRecord,
    pub w: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    #[serde(default)]
    pub intervals: Vec<IntervalRecord>,
}

impl From<Instant> for InstantRecord {
    fn from(i: Instant) -> Self {
        Self {
            day: i.day() as i64,
            hour: i.hour() as i64,
            minute: i.minute() as i64,
        }
    }
}

impl From<InstantRecord> for Instant {
    fn from(r: InstantRecord) -> Self {
        Instant::new(r.day, r.hour, r.minute)
    }
}

impl From<&WeightedInterval> for IntervalRecord {
    fn from(w: &WeightedInterval) -> Self {
        Self {
            a: w.start().into(),
            b: w.end().into(),
            w: w.weight,
        }
    }
}

impl IntervalRecord {
    /// Validate and convert; fails when `a` comes after `b`.
    pub fn to_weighted(&self) -> Result<WeightedInterval> {
        WeightedInterval::try_new(self.a.into(), self.b.into(), self.w)
    }
}
