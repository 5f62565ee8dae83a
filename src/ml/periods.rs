//! Chronological partitioning of the training range into walk-forward periods.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Three calendar years of 365.25 days
pub fn period_length() -> Duration {
    Duration::days(1095) + Duration::hours(18)
}

/// Closed interval `[start, end]` used as one incremental training step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    /// 1-indexed position in the schedule
    pub index: usize,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Period {
    /// Whether a trading date (taken at midnight) falls inside the period
    pub fn contains(&self, date: NaiveDate) -> bool {
        let at = date.and_time(NaiveTime::MIN);
        self.start <= at && at <= self.end
    }

    #[cfg(test)]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    #[cfg(test)]
    pub fn is_degenerate(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} [{} .. {}]",
            self.index,
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Split `[start, end]` into whole three-year periods followed by one
/// remainder period when the range does not divide evenly.
///
/// A range shorter than three years yields a single period spanning it,
/// `start == end` yields one degenerate period and `start > end` yields none.
pub fn partition(start: NaiveDateTime, end: NaiveDateTime) -> Vec<Period> {
    if start > end {
        return Vec::new();
    }
    if start == end {
        return vec![Period { index: 1, start, end }];
    }

    let length = period_length();
    let full_periods = (end - start).num_seconds() / length.num_seconds();

    let mut periods = Vec::with_capacity(full_periods as usize + 1);
    let mut cursor = start;
    for _ in 0..full_periods {
        let period_end = (cursor + length).min(end);
        periods.push(Period {
            index: periods.len() + 1,
            start: cursor,
            end: period_end,
        });
        cursor = period_end;
    }

    if cursor < end {
        periods.push(Period {
            index: periods.len() + 1,
            start: cursor,
            end,
        });
    }

    periods
}

/// Partition between two trading dates, both taken at midnight
pub fn partition_dates(start: NaiveDate, end: NaiveDate) -> Vec<Period> {
    partition(start.and_time(NaiveTime::MIN), end.and_time(NaiveTime::MIN))
}
