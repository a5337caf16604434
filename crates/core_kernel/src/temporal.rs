//! Calendar and time zone handling
//!
//! Billing periods are calendar concepts: "last month" is decided by the
//! calendar fields of a fixed business time zone, never by raw UTC offsets,
//! so daylight-saving changes cannot shift a period boundary.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use thiserror::Error;

/// Timezone wrapper for the business calendar
///
/// Wraps chrono_tz::Tz with custom serialization support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timezone(pub Tz);

impl Serialize for Timezone {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.name())
    }
}

impl<'de> Deserialize<'de> for Timezone {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| serde::de::Error::custom(format!("Invalid timezone: {}", s)))
    }
}

impl FromStr for Timezone {
    type Err = TemporalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tz::from_str(s)
            .map(Timezone)
            .map_err(|_| TemporalError::UnknownTimezone(s.to_string()))
    }
}

impl Timezone {
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    /// The business time zone used for UK billing
    pub fn london() -> Self {
        Self(chrono_tz::Europe::London)
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Converts a UTC datetime to the local timezone
    pub fn to_local(&self, utc: DateTime<Utc>) -> DateTime<Tz> {
        utc.with_timezone(&self.0)
    }

    /// The calendar date in this timezone at the given instant
    pub fn local_date(&self, utc: DateTime<Utc>) -> NaiveDate {
        self.to_local(utc).date_naive()
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Self::london()
    }
}

/// Errors related to temporal operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemporalError {
    #[error("Invalid period: start {start} must not be after end {end}")]
    InvalidPeriod { start: String, end: String },

    #[error("Invalid month key: {0}")]
    InvalidMonthKey(String),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// An inclusive range of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, TemporalError> {
        if start > end {
            return Err(TemporalError::InvalidPeriod {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// The whole calendar month containing `date`
    pub fn month_of(date: NaiveDate) -> Self {
        let start = date.with_day(1).unwrap_or(date);
        let end = first_of_next_month(start)
            .and_then(|next| next.pred_opt())
            .unwrap_or(date);
        Self { start, end }
    }

    /// The calendar month named by a `YYYY-MM` key
    pub fn from_month_key(key: &str) -> Result<Self, TemporalError> {
        let invalid = || TemporalError::InvalidMonthKey(key.to_string());
        let (year, month) = key.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        Ok(Self::month_of(start))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Number of calendar days covered, inclusive of both ends
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// `YYYY-MM` label of the month the range starts in
    pub fn month_key(&self) -> String {
        format!("{:04}-{:02}", self.start.year(), self.start.month())
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_month_of_handles_february() {
        let range = DateRange::month_of(date(2024, 2, 10));
        assert_eq!(range.start, date(2024, 2, 1));
        assert_eq!(range.end, date(2024, 2, 29));
        assert_eq!(range.days(), 29);
    }

    #[test]
    fn test_month_of_december() {
        let range = DateRange::month_of(date(2025, 12, 31));
        assert_eq!(range.end, date(2025, 12, 31));
        assert_eq!(range.month_key(), "2025-12");
    }

    #[test]
    fn test_month_key_round_trip() {
        let range = DateRange::from_month_key("2026-09").unwrap();
        assert_eq!(range.start, date(2026, 9, 1));
        assert_eq!(range.end, date(2026, 9, 30));
        assert!(DateRange::from_month_key("2026-13").is_err());
        assert!(DateRange::from_month_key("26-09").is_err());
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(DateRange::new(date(2024, 2, 2), date(2024, 2, 1)).is_err());
    }

    #[test]
    fn test_timezone_parse() {
        let tz: Timezone = "Europe/London".parse().unwrap();
        assert_eq!(tz, Timezone::london());
        assert!("Mars/Olympus".parse::<Timezone>().is_err());
    }
}
