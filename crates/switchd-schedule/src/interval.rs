use std::cmp::Ordering;
use std::fmt;

use crate::error::{Result, ScheduleError};
use crate::instant::Instant;

/// A closed range `[a, b]` of instants within one traversal of the week.
///
/// `a <= b` always holds: an interval never wraps past Sunday 23:59.
/// Wraparound is handled by [`WeightedSchedule`](crate::WeightedSchedule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    a: Instant,
    b: Instant,
}

impl Interval {
    /// Build `[a, b]`.
    ///
    /// # Panics
    /// Panics if `a > b`. Use [`Interval::try_new`] for untrusted input.
    pub fn new(a: Instant, b: Instant) -> Self {
        assert!(a <= b, "interval start {a} is after its end {b}");
        Self { a, b }
    }

    pub fn try_new(a: Instant, b: Instant) -> Result<Self> {
        if a > b {
            return Err(ScheduleError::InvalidInterval { a, b });
        }
        Ok(Self { a, b })
    }

    pub fn start(&self) -> Instant {
        self.a
    }

    pub fn end(&self) -> Instant {
        self.b
    }

    /// Strictly before `other`: ends before `other` starts, no touching.
    pub fn is_before(&self, other: &Interval) -> bool {
        self.b < other.a
    }

    /// Strictly after `other`: starts after `other` ends, no touching.
    pub fn is_after(&self, other: &Interval) -> bool {
        self.a > other.b
    }

    /// Neither strictly before nor strictly after; touching counts.
    pub fn overlaps(&self, other: &Interval) -> bool {
        !self.is_before(other) && !self.is_after(other)
    }

    /// The two intervals share exactly one endpoint and nothing else.
    pub fn touches(&self, other: &Interval) -> bool {
        (self.b == other.a && self.a < other.a) || (other.b == self.a && other.a < self.a)
    }

    /// `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Interval) -> bool {
        self.a <= other.a && other.b <= self.b
    }

    pub fn contains_instant(&self, i: Instant) -> bool {
        self.a <= i && i <= self.b
    }

    /// Smallest interval covering both.
    pub fn union(&self, other: &Interval) -> Interval {
        Interval {
            a: self.a.min(other.a),
            b: self.b.max(other.b),
        }
    }
}

/// Disjoint intervals are ordered; overlapping, non-identical intervals are
/// incomparable.
impl PartialOrd for Interval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.is_before(other) {
            Some(Ordering::Less)
        } else if self.is_after(other) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.a, self.b)
    }
}

/// An interval tagged with the action (switch level) to apply inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeightedInterval {
    pub interval: Interval,
    pub weight: i64,
}

impl WeightedInterval {
    /// # Panics
    /// Panics if `a > b`, like [`Interval::new`].
    pub fn new(a: Instant, b: Instant, weight: i64) -> Self {
        Self {
            interval: Interval::new(a, b),
            weight,
        }
    }

    pub fn try_new(a: Instant, b: Instant, weight: i64) -> Result<Self> {
        Ok(Self {
            interval: Interval::try_new(a, b)?,
            weight,
        })
    }

    pub fn start(&self) -> Instant {
        self.interval.start()
    }

    pub fn end(&self) -> Instant {
        self.interval.end()
    }
}

impl fmt::Display for WeightedInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} w={}", self.interval, self.weight)
    }
}
