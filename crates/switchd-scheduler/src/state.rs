use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use switchd_core::Mode;
use switchd_schedule::{ScheduleError, ScheduleRecord, WeightedSchedule};

/// Runtime state of one switch, owned by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchState {
    pub mode: Mode,
    /// Level last applied through the actuator; 0 is off.
    pub level: i64,
    /// Always a key of `schedules` when set.
    pub active_schedule: Option<String>,
    pub schedules: BTreeMap<String, WeightedSchedule>,
}

impl SwitchState {
    /// The schedule named by `active_schedule`, if any.
    pub fn active(&self) -> Option<&WeightedSchedule> {
        self.active_schedule
            .as_ref()
            .and_then(|name| self.schedules.get(name))
    }

    /// Drop an `active_schedule` that names no stored schedule.
    ///
    /// Returns the dropped name.
    pub fn clear_dangling_active(&mut self) -> Option<String> {
        match &self.active_schedule {
            Some(name) if !self.schedules.contains_key(name) => self.active_schedule.take(),
            _ => None,
        }
    }

    pub fn to_record(&self) -> SwitchRecord {
        SwitchRecord {
            mode: self.mode,
            level: self.level,
            active_schedule: self.active_schedule.clone(),
            schedules: self
                .schedules
                .iter()
                .map(|(name, s)| (name.clone(), s.to_record()))
                .collect(),
        }
    }

    /// Rebuild from a persisted record, re-validating every schedule.
    ///
    /// A dangling `active_schedule` is kept; call
    /// [`clear_dangling_active`](Self::clear_dangling_active) afterwards.
    pub fn from_record(record: &SwitchRecord) -> Result<Self, ScheduleError> {
        let mut schedules = BTreeMap::new();
        for (name, r) in &record.schedules {
            schedules.insert(name.clone(), WeightedSchedule::from_record(r)?);
        }
        Ok(Self {
            mode: record.mode,
            level: record.level,
            active_schedule: record.active_schedule.clone(),
            schedules,
        })
    }
}

/// JSON shape stored in the `switches.record` column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchRecord {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub level: i64,
    #[serde(default)]
    pub active_schedule: Option<String>,
    #[serde(default)]
    pub schedules: BTreeMap<String, ScheduleRecord>,
}
