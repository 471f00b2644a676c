use std::fmt;

use chrono::{Datelike, Duration, Local, NaiveDateTime, NaiveTime};

pub const MINUTES_PER_HOUR: i64 = 60;
pub const MINUTES_PER_DAY: i64 = 24 * MINUTES_PER_HOUR;
pub const DAYS_PER_WEEK: i64 = 7;
pub const MINUTES_PER_WEEK: i64 = DAYS_PER_WEEK * MINUTES_PER_DAY;

const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// A point inside a repeating 7-day week, at minute resolution.
///
/// Stored as minutes elapsed since Monday 00:00 and always normalised into
/// `[0, MINUTES_PER_WEEK)`. Every constructor wraps modulo one week, so
/// `Instant::new(8, 2, 1)` is Tuesday 02:01.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant(u32);

impl Instant {
    /// Monday 00:00.
    pub const WEEK_START: Instant = Instant(0);
    /// Sunday 23:59, the last representable minute of the week.
    pub const WEEK_END: Instant = Instant((MINUTES_PER_WEEK - 1) as u32);

    /// Build from day (0 = Monday), hour and minute, wrapping out-of-range
    /// values (including negative ones) around the week.
    pub fn new(day: i64, hour: i64, minute: i64) -> Self {
        Self::from_minutes(day * MINUTES_PER_DAY + hour * MINUTES_PER_HOUR + minute)
    }

    pub fn from_minutes(minutes: i64) -> Self {
        Self(minutes.rem_euclid(MINUTES_PER_WEEK) as u32)
    }

    /// The instant of `dt` within its own week, floored to the minute.
    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        Self::from_minutes((dt - week_start(dt)).num_minutes())
    }

    /// The current local wall-clock instant.
    pub fn now() -> Self {
        Self::from_datetime(Local::now().naive_local())
    }

    /// Absolute date-time of this instant in the week containing `reference`.
    ///
    /// The result may lie before `reference`; callers that need a future
    /// moment add whole weeks themselves.
    pub fn to_datetime(self, reference: NaiveDateTime) -> NaiveDateTime {
        week_start(reference) + self.offset()
    }

    pub fn minutes(self) -> u32 {
        self.0
    }

    /// Day of week, 0 = Monday.
    pub fn day(self) -> u32 {
        self.0 / MINUTES_PER_DAY as u32
    }

    pub fn hour(self) -> u32 {
        (self.0 % MINUTES_PER_DAY as u32) / MINUTES_PER_HOUR as u32
    }

    pub fn minute(self) -> u32 {
        self.0 % MINUTES_PER_HOUR as u32
    }

    /// Minutes since midnight of this instant's day.
    pub fn minute_of_day(self) -> u32 {
        self.0 % MINUTES_PER_DAY as u32
    }

    /// Offset from the start of the week.
    pub fn offset(self) -> Duration {
        Duration::minutes(self.0 as i64)
    }

    /// Move by `minutes` (negative moves backwards), wrapping around the week.
    pub fn add_minutes(self, minutes: i64) -> Self {
        Self::from_minutes(self.0 as i64 + minutes)
    }

    /// Forward distance to `other`, wrapping past the end of the week.
    ///
    /// Always in `[0, MINUTES_PER_WEEK)`; zero when both are equal.
    pub fn minutes_until(self, other: Instant) -> u32 {
        (other.0 as i64 - self.0 as i64).rem_euclid(MINUTES_PER_WEEK) as u32
    }
}

impl fmt::Debug for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instant")
            .field("day", &self.day())
            .field("hour", &self.hour())
            .field("minute", &self.minute())
            .finish()
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}",
            DAY_NAMES[self.day() as usize],
            self.hour(),
            self.minute()
        )
    }
}

/// Monday 00:00 of the week containing `dt`.
pub fn week_start(dt: NaiveDateTime) -> NaiveDateTime {
    let monday = dt.date() - Duration::days(dt.weekday().num_days_from_monday() as i64);
    monday.and_time(NaiveTime::MIN)
}
