//! Time units and the granularity that aligns them.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use clap::ValueEnum;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
#[value(rename_all = "UPPER")]
/// Operating mode of a run. Fixes the alignment of every time-keyed structure.
pub enum Granularity {
    Hourly,
    Daily,
}

impl Granularity {
    /// Directory segment used by the remote archive.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hourly => "HOURLY",
            Granularity::Daily => "DAILY",
        }
    }

    /// Name of the time column in the storage tables.
    pub fn time_column(&self) -> &'static str {
        match self {
            Granularity::Hourly => "data_hora",
            Granularity::Daily => "data",
        }
    }

    /// Format accepted for `SYNC_FROM` / `SYNC_TO`.
    pub fn setting_format(&self) -> &'static str {
        match self {
            Granularity::Hourly => "YYYY-MM-DDhHH",
            Granularity::Daily => "YYYY-MM-DD",
        }
    }

    /// Number of digits in a file name stamp.
    pub fn stamp_len(&self) -> usize {
        match self {
            Granularity::Hourly => 10,
            Granularity::Daily => 8,
        }
    }

    /// Units that make up one calendar day.
    pub fn units_per_day(&self) -> i64 {
        match self {
            Granularity::Hourly => 24,
            Granularity::Daily => 1,
        }
    }

    fn span(&self, units: i64) -> Option<TimeDelta> {
        match self {
            Granularity::Hourly => TimeDelta::try_hours(units),
            Granularity::Daily => TimeDelta::try_days(units),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key shared by every unit stored under one remote directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BatchKey {
    Day { year: i32, month: u32, day: u32 },
    Month { year: i32, month: u32 },
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKey::Day { year, month, day } => write!(f, "({year}, {month}, {day})"),
            BatchKey::Month { year, month } => write!(f, "({year}, {month})"),
        }
    }
}

/// An hour- or day-aligned instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeUnit {
    granularity: Granularity,
    instant: NaiveDateTime,
}

impl TimeUnit {
    /// Aligns `instant` down to the unit boundary.
    pub fn truncate(granularity: Granularity, instant: NaiveDateTime) -> Self {
        let midnight = NaiveDateTime::new(instant.date(), NaiveTime::MIN);
        let instant = match granularity {
            Granularity::Hourly => midnight + TimeDelta::hours(i64::from(instant.hour())),
            Granularity::Daily => midnight,
        };

        TimeUnit {
            granularity,
            instant,
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn instant(&self) -> NaiveDateTime {
        self.instant
    }

    pub fn date(&self) -> NaiveDate {
        self.instant.date()
    }

    /// Moves the unit by `units` steps (negative goes back in time).
    /// `None` when the result falls outside the representable calendar.
    pub fn offset(&self, units: i64) -> Option<Self> {
        let instant = self
            .instant
            .checked_add_signed(self.granularity.span(units)?)?;

        Some(TimeUnit {
            granularity: self.granularity,
            instant,
        })
    }

    pub fn next(&self) -> Option<Self> {
        self.offset(1)
    }

    /// Whole units from `self` to `other`; negative when `other` is earlier.
    pub fn units_until(&self, other: &TimeUnit) -> i64 {
        let delta = other.instant - self.instant;
        match self.granularity {
            Granularity::Hourly => delta.num_hours(),
            Granularity::Daily => delta.num_days(),
        }
    }

    pub fn batch_key(&self) -> BatchKey {
        let date = self.instant.date();
        match self.granularity {
            Granularity::Hourly => BatchKey::Day {
                year: date.year(),
                month: date.month(),
                day: date.day(),
            },
            Granularity::Daily => BatchKey::Month {
                year: date.year(),
                month: date.month(),
            },
        }
    }

    /// `YYYYMMDDHH` for hourly units, `YYYYMMDD` for daily units.
    pub fn stamp(&self) -> String {
        match self.granularity {
            Granularity::Hourly => self.instant.format("%Y%m%d%H").to_string(),
            Granularity::Daily => self.instant.format("%Y%m%d").to_string(),
        }
    }

    /// Inverse of [`TimeUnit::stamp`]. `None` when the digits are not a valid unit.
    pub fn from_stamp(granularity: Granularity, stamp: &str) -> Option<Self> {
        if stamp.len() != granularity.stamp_len() || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let date = NaiveDate::parse_from_str(&stamp[..8], "%Y%m%d").ok()?;
        let hour = match granularity {
            Granularity::Hourly => stamp[8..].parse::<u32>().ok().filter(|h| *h < 24)?,
            Granularity::Daily => 0,
        };
        let time = NaiveTime::from_hms_opt(hour, 0, 0)?;

        Some(TimeUnit {
            granularity,
            instant: NaiveDateTime::new(date, time),
        })
    }

    /// Parses a window boundary as given in `SYNC_FROM` / `SYNC_TO`.
    pub fn parse_setting(granularity: Granularity, value: &str) -> Result<Self> {
        let invalid = || {
            SyncError::config(format!(
                "`{value}` is not a valid {granularity} boundary, expected {}",
                granularity.setting_format()
            ))
        };

        let value = value.trim();
        let (date, hour) = match granularity {
            Granularity::Hourly => {
                let (date, hour) = value.split_once(['h', 'H']).ok_or_else(invalid)?;
                let hour = hour.parse::<u32>().map_err(|_| invalid())?;
                (date, hour)
            }
            Granularity::Daily => (value, 0),
        };

        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;
        let time = NaiveTime::from_hms_opt(hour, 0, 0).ok_or_else(invalid)?;

        Ok(TimeUnit {
            granularity,
            instant: NaiveDateTime::new(date, time),
        })
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.granularity {
            Granularity::Hourly => write!(f, "{}", self.instant.format("%Y-%m-%d %H:00")),
            Granularity::Daily => write!(f, "{}", self.instant.format("%Y-%m-%d")),
        }
    }
}

// -- Tests -------------------------------------------------------------------
