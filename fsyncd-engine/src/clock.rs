//! Daily schedule clock.
//!
//! A [`WallTime`] is parsed once at configuration time; a [`ScheduleClock`]
//! turns it into the duration until the next occurrence of that wall time in
//! a configured IANA timezone. The clock is re-armed from the then-current
//! instant after every firing, so a run that takes long merely shifts the
//! next tick and missed days are never batched.

use std::time::Duration;

use chrono::{DateTime, Duration as TimeDelta, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;

use crate::errors::{Result, SyncError};

/// A time of day in the `HH:MM:SS` configuration format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallTime {
    hour: u32,
    minute: u32,
    second: u32,
}

impl WallTime {
    /// Parse `HH:MM:SS` with `0 <= H <= 23` and `0 <= M,S <= 59`.
    /// Anything else, including a wrong number of `:` separators or a
    /// non-numeric component, is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 3 {
            return Err(SyncError::InvalidSyncTime(format!(
                "expected HH:MM:SS, got '{raw}'"
            )));
        }

        let hour = parse_component(parts[0], "hours", 23)?;
        let minute = parse_component(parts[1], "minutes", 59)?;
        let second = parse_component(parts[2], "seconds", 59)?;

        Ok(Self {
            hour,
            minute,
            second,
        })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn second(&self) -> u32 {
        self.second
    }
}

impl std::fmt::Display for WallTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hour, self.minute, self.second
        )
    }
}

fn parse_component(raw: &str, what: &str, max: u32) -> Result<u32> {
    let value: u32 = raw
        .parse()
        .map_err(|_| SyncError::InvalidSyncTime(format!("{what} not numeric: '{raw}'")))?;
    if value > max {
        return Err(SyncError::InvalidSyncTime(format!(
            "{what} have to be in between of 0 and {max}"
        )));
    }
    Ok(value)
}

/// Produces the interval until the next daily firing of a wall time in a
/// fixed timezone.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleClock {
    time: WallTime,
    tz: Tz,
}

impl ScheduleClock {
    pub fn new(time: WallTime, tz: Tz) -> Self {
        Self { time, tz }
    }

    /// Duration from the current instant until the next firing.
    pub fn next_interval(&self) -> Result<Duration> {
        self.interval_from(Utc::now().with_timezone(&self.tz))
    }

    /// Duration from `now` until the next firing: today's wall time in the
    /// configured zone, advanced by 24 h when that instant is not strictly
    /// after `now`.
    pub fn interval_from(&self, now: DateTime<Tz>) -> Result<Duration> {
        let naive = now
            .date_naive()
            .and_hms_opt(self.time.hour, self.time.minute, self.time.second)
            .ok_or_else(|| {
                SyncError::Invariant(format!("unrepresentable wall time {}", self.time))
            })?;

        // A DST transition can make the local wall time ambiguous (fall
        // back) or nonexistent (spring forward); take the earliest
        // candidate, or roll to the next day when the time does not exist.
        let mut target = match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => t,
            LocalResult::Ambiguous(earliest, _) => earliest,
            LocalResult::None => self
                .tz
                .from_local_datetime(&(naive + TimeDelta::days(1)))
                .earliest()
                .ok_or_else(|| {
                    SyncError::Invariant(format!("unresolvable local time {}", self.time))
                })?,
        };

        if target <= now {
            target = target + TimeDelta::hours(24);
        }

        (target - now)
            .to_std()
            .map_err(|_| SyncError::Invariant("negative schedule interval".to_string()))
    }
}
