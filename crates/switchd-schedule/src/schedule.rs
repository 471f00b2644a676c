use chrono::{Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};
use crate::instant::{week_start, Instant, MINUTES_PER_WEEK};
use crate::interval::WeightedInterval;
use crate::record::{IntervalRecord, ScheduleRecord};

/// What a schedule asks for at a given moment.
///
/// `weight = None` means the schedule is in a gap: no weighted state is
/// active and the switch should be off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub weight: Option<i64>,
    pub at: NaiveDateTime,
}

/// A point in the week where the effective weight changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub at: Instant,
    pub weight: Option<i64>,
}

/// An ordered set of non-overlapping weighted intervals spanning a week.
///
/// Intervals are kept sorted by start. Two stored intervals never share an
/// instant, except for a single-endpoint hand-off between different weights.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightedSchedule {
    intervals: Vec<WeightedInterval>,
}

impl WeightedSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schedule by inserting each interval in turn.
    pub fn from_intervals<I>(intervals: I) -> Result<Self>
    where
        I: IntoIterator<Item = WeightedInterval>,
    {
        let mut schedule = Self::new();
        for interval in intervals {
            schedule.add_interval(interval)?;
        }
        Ok(schedule)
    }

    /// Insert `new`, merging it with overlapping intervals of the same weight.
    ///
    /// * disjoint from everything: inserted at its sorted position;
    /// * inside a same-weight interval: no-op;
    /// * overlapping same-weight intervals: all of them are replaced by the union;
    /// * sharing more than one endpoint with a different weight: rejected with
    ///   [`ScheduleError::ConflictingOverlap`], schedule unchanged. This
    ///   includes an interval lying wholly inside one of a different weight,
    ///   which is refused rather than silently dropped.
    pub fn add_interval(&mut self, new: WeightedInterval) -> Result<()> {
        let n = new.interval;

        // Stored intervals sharing at least one instant with `n` form the run [lo, hi).
        let lo = self
            .intervals
            .partition_point(|s| s.interval.is_before(&n));
        let hi = lo
            + self.intervals[lo..]
                .iter()
                .take_while(|s| !n.is_before(&s.interval))
                .count();

        let mut merged = n;
        for s in &self.intervals[lo..hi] {
            if s.weight == new.weight {
                if s.interval.contains(&n) {
                    return Ok(());
                }
                merged = merged.union(&s.interval);
            } else if !s.interval.touches(&n) {
                return Err(ScheduleError::ConflictingOverlap {
                    new,
                    existing: *s,
                });
            }
        }

        let mut run: Vec<WeightedInterval> = self
            .intervals
            .drain(lo..hi)
            .filter(|s| s.weight != new.weight)
            .collect();
        run.push(WeightedInterval {
            interval: merged,
            weight: new.weight,
        });
        run.sort_by_key(|s| (s.start(), s.end()));
        self.intervals.splice(lo..lo, run);
        Ok(())
    }

    pub fn intervals(&self) -> &[WeightedInterval] {
        &self.intervals
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    /// Weight of the interval containing `i`, or `None` when `i` is in a gap.
    ///
    /// On a hand-off minute shared by two intervals the later one wins.
    pub fn get_weight(&self, i: Instant) -> Option<i64> {
        self.intervals
            .iter()
            .rev()
            .find(|s| s.interval.contains_instant(i))
            .map(|s| s.weight)
    }

    /// The cyclic list of points where the effective weight changes.
    ///
    /// Each interval applies its weight at its start. After its end the
    /// schedule clears to `None`, unless the next interval (the first one,
    /// a week later, for the last interval) starts at most one minute later.
    /// Transitions that would not change the effective weight are dropped.
    pub fn transitions(&self) -> Vec<Transition> {
        let n = self.intervals.len();
        let mut out: Vec<Transition> = Vec::with_capacity(n * 2);

        for (idx, cur) in self.intervals.iter().enumerate() {
            push_transition(
                &mut out,
                Transition {
                    at: cur.start(),
                    weight: Some(cur.weight),
                },
            );

            let next = &self.intervals[(idx + 1) % n];
            let gap = match cur.end().minutes_until(next.start()) {
                // A lone zero-length interval only comes round a week later.
                0 if n == 1 => MINUTES_PER_WEEK as u32,
                gap => gap,
            };
            if gap > 1 {
                push_transition(
                    &mut out,
                    Transition {
                        at: cur.end(),
                        weight: None,
                    },
                );
            }
        }

        let Some(&first) = out.first() else {
            return out;
        };
        // The weight in force before the first transition is the last one's.
        let mut effective = out[out.len() - 1].weight;
        out.retain(|t| {
            let changes = t.weight != effective;
            effective = t.weight;
            changes
        });
        if out.is_empty() {
            // One continuous same-weight loop: keep a single re-application.
            out.push(first);
        }
        out
    }

    /// The action in force at `now`: the latest transition at or before it.
    ///
    /// Returns `None` for an empty schedule.
    pub fn current_action_at(&self, now: NaiveDateTime) -> Option<Action> {
        let transitions = self.transitions();
        let start = week_start(now);

        if let Some(t) = transitions.iter().rev().find(|t| start + t.at.offset() <= now) {
            return Some(Action {
                weight: t.weight,
                at: start + t.at.offset(),
            });
        }
        // Before this week's first transition: the last one of last week holds.
        transitions.last().map(|t| Action {
            weight: t.weight,
            at: start + t.at.offset() - Duration::weeks(1),
        })
    }

    /// The nearest transition strictly after `now`.
    ///
    /// When none is left this week it is the first transition one week
    /// later. Returns `None` for an empty schedule.
    pub fn next_action_at(&self, now: NaiveDateTime) -> Option<Action> {
        let transitions = self.transitions();
        let start = week_start(now);

        if let Some(t) = transitions.iter().find(|t| start + t.at.offset() > now) {
            return Some(Action {
                weight: t.weight,
                at: start + t.at.offset(),
            });
        }
        transitions.first().map(|t| Action {
            weight: t.weight,
            at: start + t.at.offset() + Duration::weeks(1),
        })
    }

    pub fn current_action(&self) -> Option<Action> {
        self.current_action_at(Local::now().naive_local())
    }

    pub fn next_action(&self) -> Option<Action> {
        self.next_action_at(Local::now().naive_local())
    }

    pub fn to_record(&self) -> ScheduleRecord {
        ScheduleRecord {
            intervals: self.intervals.iter().map(IntervalRecord::from).collect(),
        }
    }

    /// Rebuild from persisted tuples, re-validating every interval.
    pub fn from_record(record: &ScheduleRecord) -> Result<Self> {
        let mut schedule = Self::new();
        for r in &record.intervals {
            schedule.add_interval(r.to_weighted()?)?;
        }
        Ok(schedule)
    }
}

/// Append `t`, replacing a transition at the same instant.
fn push_transition(out: &mut Vec<Transition>, t: Transition) {
    match out.last_mut() {
        Some(last) if last.at == t.at => *last = t,
        _ => out.push(t),
    }
}
