//! Billing period resolution
//!
//! A run always bills the calendar month before the one the trigger fires in,
//! as seen from the business time zone.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{DateRange, TemporalError, Timezone};

/// The month being billed
///
/// Derived purely from the invocation instant and the time zone; never
/// persisted except through its `period_key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    /// First day of the month (inclusive)
    pub start_date: NaiveDate,
    /// Last day of the month (inclusive)
    pub end_date: NaiveDate,
    /// `YYYY-MM` label, the ledger key
    pub period_key: String,
}

impl BillingPeriod {
    /// Resolves the calendar month preceding `now` in `tz`
    pub fn previous_month(now: DateTime<Utc>, tz: &Timezone) -> Result<Self, TemporalError> {
        let today = tz.local_date(now);
        let current = DateRange::month_of(today);
        let last_of_previous = current.start.pred_opt().ok_or_else(|| {
            TemporalError::InvalidPeriod {
                start: current.start.to_string(),
                end: today.to_string(),
            }
        })?;
        Ok(Self::from_range(DateRange::month_of(last_of_previous)))
    }

    /// Rebuilds a period from its `YYYY-MM` key
    pub fn from_key(period_key: &str) -> Result<Self, TemporalError> {
        DateRange::from_month_key(period_key).map(Self::from_range)
    }

    fn from_range(range: DateRange) -> Self {
        Self {
            start_date: range.start,
            end_date: range.end,
            period_key: range.month_key(),
        }
    }

    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.range().contains(date)
    }

    /// Human label, e.g. "September 2026"
    pub fn label(&self) -> String {
        self.start_date.format("%B %Y").to_string()
    }
}

/// The local calendar date an invoice raised at `now` carries
pub fn invoice_date(now: DateTime<Utc>, tz: &Timezone) -> NaiveDate {
    tz.local_date(now)
}

/// True on the first day of the month in the business time zone
pub fn is_billing_day(now: DateTime<Utc>, tz: &Timezone) -> bool {
    tz.local_date(now).day() == 1
}
