//! Calendar dates in the compact `YYYYMMDD` form used on the command line,
//! in job names and in the state file.

use crate::error::TriggerError;
use chrono::{Days, NaiveDate};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const COMPACT_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchDate(NaiveDate);

impl BatchDate {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// Current date in UTC.
    pub fn today_utc() -> Self {
        Self(chrono::Utc::now().date_naive())
    }

    /// The following calendar day. Saturates at chrono's maximum date.
    pub fn succ(self) -> Self {
        self.0.checked_add_days(Days::new(1)).map_or(self, Self)
    }
}

impl fmt::Display for BatchDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(COMPACT_FORMAT))
    }
}

impl FromStr for BatchDate {
    type Err = TriggerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        // chrono accepts unpadded fields, so pin the shape first.
        if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TriggerError::InvalidDate {
                value: raw.to_string(),
            });
        }
        NaiveDate::parse_from_str(raw, COMPACT_FORMAT)
            .map(Self)
            .map_err(|_| TriggerError::InvalidDate {
                value: raw.to_string(),
            })
    }
}

impl Serialize for BatchDate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BatchDate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|_| D::Error::custom(format!("invalid date value {raw:?}")))
    }
}

/// Inclusive range of dates to trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: BatchDate,
    end: BatchDate,
}

impl DateRange {
    pub fn new(start: BatchDate, end: BatchDate) -> Result<Self, TriggerError> {
        if start > end {
            return Err(TriggerError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> BatchDate {
        self.start
    }

    pub fn end(&self) -> BatchDate {
        self.end
    }

    pub fn contains(&self, date: BatchDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}
