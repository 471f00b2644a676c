//! Quarter-hour slot view of a schedule, as edited by a front-end.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::instant::{Instant, MINUTES_PER_DAY, MINUTES_PER_WEEK};
use crate::interval::WeightedInterval;
use crate::schedule::WeightedSchedule;

pub const SLOT_MINUTES: u32 = 15;
pub const SLOTS_PER_DAY: u32 = MINUTES_PER_DAY as u32 / SLOT_MINUTES;

/// A run of slots `[start, end]` carrying one weight.
///
/// In [`WeightedSchedule::from_slots`] slots count from the week start; in
/// [`WeightedSchedule::day_grid`] they count from the day start (`0..=96`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpan {
    pub start: u32,
    pub end: u32,
    pub weight: i64,
}

impl SlotSpan {
    pub fn new(start: u32, end: u32, weight: i64) -> Self {
        Self { start, end, weight }
    }
}

impl WeightedSchedule {
    /// Build a schedule from week-relative slot spans.
    ///
    /// The boundary at the very end of the week maps to Sunday 23:59.
    pub fn from_slots(spans: &[SlotSpan]) -> Result<Self> {
        let mut schedule = Self::new();
        for span in spans {
            let a = slot_instant(span.start);
            let b = slot_instant(span.end);
            schedule.add_interval(WeightedInterval::try_new(a, b, span.weight)?)?;
        }
        Ok(schedule)
    }

    /// Per-day slot spans, splitting intervals that cross midnight.
    pub fn day_grid(&self) -> [Vec<SlotSpan>; 7] {
        let mut days: [Vec<SlotSpan>; 7] = Default::default();
        for w in self.intervals() {
            let (a, b) = (w.start(), w.end());
            let first_day = a.day();
            let last_day = b.day();
            let start_slot = a.minute_of_day() / SLOT_MINUTES;
            let end_slot = b.minute_of_day().div_ceil(SLOT_MINUTES);

            if first_day == last_day {
                days[first_day as usize].push(SlotSpan::new(start_slot, end_slot, w.weight));
                continue;
            }
            days[first_day as usize].push(SlotSpan::new(start_slot, SLOTS_PER_DAY, w.weight));
            for day in first_day + 1..last_day {
                days[day as usize].push(SlotSpan::new(0, SLOTS_PER_DAY, w.weight));
            }
            if end_slot > 0 {
                days[last_day as usize].push(SlotSpan::new(0, end_slot, w.weight));
            }
        }
        days
    }
}

fn slot_instant(slot: u32) -> Instant {
    let minutes = (slot as i64 * SLOT_MINUTES as i64).min(MINUTES_PER_WEEK - 1);
    Instant::from_minutes(minutes)
}
