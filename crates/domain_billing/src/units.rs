//! Billable units
//!
//! A billable unit is anything individually priceable that can land on an
//! invoice: a time entry, a mileage entry or an instance of a recurring
//! charge. Units are created upstream; the billing engine only moves them
//! through their billing status.
//!
//! # Status lifecycle
//!
//! ```text
//! Unbilled ──claim──▶ BillingPending ──finalize──▶ Billed ──▶ Paid
//!    ▲                      │
//!    └──────release─────────┘
//! ```
//!
//! `billing_run_id` is a lock marker, not an ownership relation. It is set on
//! claim and cleared on release.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use core_kernel::{
    BillingRunId, CoreError, InvoiceId, MileageEntryId, Money, ProjectId,
    RecurringChargeId, RecurringChargeInstanceId, TimeEntryId, VatRate, VendorId,
};

use crate::period::BillingPeriod;

/// Billing status shared by every kind of unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Eligible for the next run
    Unbilled,
    /// Claimed by a run, invoice not yet delivered
    BillingPending,
    /// On a delivered invoice
    Billed,
    /// On an invoice that has been paid
    Paid,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Unbilled => "unbilled",
            UnitStatus::BillingPending => "billing_pending",
            UnitStatus::Billed => "billed",
            UnitStatus::Paid => "paid",
        }
    }

    /// `unbilled -> billing_pending`
    pub fn claim(self) -> Result<Self, CoreError> {
        match self {
            UnitStatus::Unbilled => Ok(UnitStatus::BillingPending),
            other => Err(CoreError::transition("unit", other, UnitStatus::BillingPending)),
        }
    }

    /// `billing_pending -> unbilled`
    pub fn release(self) -> Result<Self, CoreError> {
        match self {
            UnitStatus::BillingPending => Ok(UnitStatus::Unbilled),
            other => Err(CoreError::transition("unit", other, UnitStatus::Unbilled)),
        }
    }

    /// `billing_pending -> billed | paid`, or `billed -> paid` during reconciliation
    pub fn finalize(self, target: SettledStatus) -> Result<Self, CoreError> {
        match (self, target) {
            (UnitStatus::BillingPending, SettledStatus::Billed) => Ok(UnitStatus::Billed),
            (UnitStatus::BillingPending | UnitStatus::Billed, SettledStatus::Paid) => {
                Ok(UnitStatus::Paid)
            }
            (current, target) => Err(CoreError::transition(
                "unit",
                current,
                target.as_unit_status(),
            )),
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unbilled" => Ok(UnitStatus::Unbilled),
            "billing_pending" => Ok(UnitStatus::BillingPending),
            "billed" => Ok(UnitStatus::Billed),
            "paid" => Ok(UnitStatus::Paid),
            other => Err(CoreError::unknown("unit status", other)),
        }
    }
}

/// Terminal status written when an invoice is known to have been delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettledStatus {
    Billed,
    Paid,
}

impl SettledStatus {
    pub fn as_unit_status(&self) -> UnitStatus {
        match self {
            SettledStatus::Billed => UnitStatus::Billed,
            SettledStatus::Paid => UnitStatus::Paid,
        }
    }
}

/// Kind of billable unit, in allocation priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    RecurringCharge,
    Mileage,
    Time,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::RecurringCharge => "recurring_charge",
            UnitKind::Mileage => "mileage",
            UnitKind::Time => "time",
        }
    }
}

/// Reference to a single unit, independent of its kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum UnitRef {
    RecurringCharge(RecurringChargeInstanceId),
    Mileage(MileageEntryId),
    Time(TimeEntryId),
}

/// A priced unit: net, VAT and gross, each rounded to pence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPrice {
    pub ex_vat: Money,
    pub vat: Money,
    pub inc_vat: Money,
}

impl UnitPrice {
    pub fn new(ex_vat: Money, vat_rate: VatRate) -> Self {
        let ex_vat = ex_vat.round_pence();
        let vat = vat_rate.vat_on(ex_vat);
        Self {
            ex_vat,
            vat,
            inc_vat: ex_vat + vat,
        }
    }
}

/// Time logged against a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: TimeEntryId,
    pub vendor_id: VendorId,
    pub project_id: ProjectId,
    pub project_name: String,
    pub entry_date: NaiveDate,
    pub duration_minutes: u32,
    pub hourly_rate_ex_vat: Money,
    pub vat_rate: VatRate,
    pub description: Option<String>,
    pub status: UnitStatus,
    pub billing_run_id: Option<BillingRunId>,
    pub invoice_id: Option<InvoiceId>,
    pub created_at: DateTime<Utc>,
}

impl TimeEntry {
    pub fn hours(&self) -> Decimal {
        Decimal::from(self.duration_minutes) / dec!(60)
    }

    /// `round(hours x rate)`, then VAT on the rounded net
    pub fn price(&self) -> UnitPrice {
        UnitPrice::new(self.hourly_rate_ex_vat.times(self.hours()), self.vat_rate)
    }
}

/// Miles driven on a vendor's behalf
///
/// Mileage is VAT-exempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MileageEntry {
    pub id: MileageEntryId,
    pub vendor_id: VendorId,
    pub project_id: Option<ProjectId>,
    pub project_name: Option<String>,
    pub entry_date: NaiveDate,
    pub miles: Decimal,
    pub mileage_rate: Money,
    pub description: Option<String>,
    pub status: UnitStatus,
    pub billing_run_id: Option<BillingRunId>,
    pub invoice_id: Option<InvoiceId>,
    pub created_at: DateTime<Utc>,
}

impl MileageEntry {
    pub fn price(&self) -> UnitPrice {
        UnitPrice::new(self.mileage_rate.times(self.miles), VatRate::ZERO)
    }
}

/// A vendor's standing monthly charge (retainer, hosting, licence...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringCharge {
    pub id: RecurringChargeId,
    pub vendor_id: VendorId,
    pub description: String,
    pub amount_ex_vat: Money,
    pub vat_rate: VatRate,
    pub sort_order: i32,
    pub is_active: bool,
}

impl RecurringCharge {
    /// Snapshot of this charge for one billing period
    pub fn instantiate(&self, period: &BillingPeriod) -> NewRecurringChargeInstance {
        NewRecurringChargeInstance {
            vendor_id: self.vendor_id,
            recurring_charge_id: self.id,
            period_key: period.period_key.clone(),
            period_start: period.start_date,
            period_end: period.end_date,
            description: self.description.clone(),
            amount_ex_vat: self.amount_ex_vat,
            vat_rate: self.vat_rate,
            sort_order: self.sort_order,
        }
    }
}

/// Insert-if-absent payload keyed by `(vendor, charge, period_key)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecurringChargeInstance {
    pub vendor_id: VendorId,
    pub recurring_charge_id: RecurringChargeId,
    pub period_key: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub description: String,
    pub amount_ex_vat: Money,
    pub vat_rate: VatRate,
    pub sort_order: i32,
}

/// One period's occurrence of a recurring charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringChargeInstance {
    pub id: RecurringChargeInstanceId,
    pub vendor_id: VendorId,
    pub recurring_charge_id: RecurringChargeId,
    pub period_key: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub description: String,
    pub amount_ex_vat: Money,
    pub vat_rate: VatRate,
    pub sort_order: i32,
    pub status: UnitStatus,
    pub billing_run_id: Option<BillingRunId>,
    pub invoice_id: Option<InvoiceId>,
    pub created_at: DateTime<Utc>,
}

impl RecurringChargeInstance {
    pub fn price(&self) -> UnitPrice {
        UnitPrice::new(self.amount_ex_vat, self.vat_rate)
    }
}

/// Any billable unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BillableUnit {
    RecurringCharge(RecurringChargeInstance),
    Mileage(MileageEntry),
    Time(TimeEntry),
}

impl BillableUnit {
    pub fn kind(&self) -> UnitKind {
        match self {
            BillableUnit::RecurringCharge(_) => UnitKind::RecurringCharge,
            BillableUnit::Mileage(_) => UnitKind::Mileage,
            BillableUnit::Time(_) => UnitKind::Time,
        }
    }

    pub fn unit_ref(&self) -> UnitRef {
        match self {
            BillableUnit::RecurringCharge(u) => UnitRef::RecurringCharge(u.id),
            BillableUnit::Mileage(u) => UnitRef::Mileage(u.id),
            BillableUnit::Time(u) => UnitRef::Time(u.id),
        }
    }

    pub fn vendor_id(&self) -> VendorId {
        match self {
            BillableUnit::RecurringCharge(u) => u.vendor_id,
            BillableUnit::Mileage(u) => u.vendor_id,
            BillableUnit::Time(u) => u.vendor_id,
        }
    }

    pub fn status(&self) -> UnitStatus {
        match self {
            BillableUnit::RecurringCharge(u) => u.status,
            BillableUnit::Mileage(u) => u.status,
            BillableUnit::Time(u) => u.status,
        }
    }

    pub fn billing_run_id(&self) -> Option<BillingRunId> {
        match self {
            BillableUnit::RecurringCharge(u) => u.billing_run_id,
            BillableUnit::Mileage(u) => u.billing_run_id,
            BillableUnit::Time(u) => u.billing_run_id,
        }
    }

    /// The date that places this unit in time: work date, or period start
    /// for recurring charges
    pub fn effective_date(&self) -> NaiveDate {
        match self {
            BillableUnit::RecurringCharge(u) => u.period_start,
            BillableUnit::Mileage(u) => u.entry_date,
            BillableUnit::Time(u) => u.entry_date,
        }
    }

    pub fn price(&self) -> UnitPrice {
        match self {
            BillableUnit::RecurringCharge(u) => u.price(),
            BillableUnit::Mileage(u) => u.price(),
            BillableUnit::Time(u) => u.price(),
        }
    }

    /// Allocation order: recurring charges by period then sort order, then
    /// mileage, then time, each chronological
    pub fn allocation_key(&self) -> (UnitKind, NaiveDate, i32, DateTime<Utc>, uuid::Uuid) {
        match self {
            BillableUnit::RecurringCharge(u) => (
                UnitKind::RecurringCharge,
                u.period_start,
                u.sort_order,
                u.created_at,
                *u.id.as_uuid(),
            ),
            BillableUnit::Mileage(u) => (
                UnitKind::Mileage,
                u.entry_date,
                0,
                u.created_at,
                *u.id.as_uuid(),
            ),
            BillableUnit::Time(u) => (
                UnitKind::Time,
                u.entry_date,
                0,
                u.created_at,
                *u.id.as_uuid(),
            ),
        }
    }
}

/// Snapshot of the unit ids a run locked, persisted on the run row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSelection {
    #[serde(default)]
    pub recurring_instance_ids: Vec<RecurringChargeInstanceId>,
    #[serde(default)]
    pub mileage_entry_ids: Vec<MileageEntryId>,
    #[serde(default)]
    pub time_entry_ids: Vec<TimeEntryId>,
}

impl UnitSelection {
    pub fn from_units<'a>(units: impl IntoIterator<Item = &'a BillableUnit>) -> Self {
        let mut selection = Self::default();
        for unit in units {
            selection.push(unit.unit_ref());
        }
        selection
    }

    pub fn push(&mut self, unit: UnitRef) {
        match unit {
            UnitRef::RecurringCharge(id) => self.recurring_instance_ids.push(id),
            UnitRef::Mileage(id) => self.mileage_entry_ids.push(id),
            UnitRef::Time(id) => self.time_entry_ids.push(id),
        }
    }

    pub fn refs(&self) -> impl Iterator<Item = UnitRef> + '_ {
        self.recurring_instance_ids
            .iter()
            .map(|id| UnitRef::RecurringCharge(*id))
            .chain(self.mileage_entry_ids.iter().map(|id| UnitRef::Mileage(*id)))
            .chain(self.time_entry_ids.iter().map(|id| UnitRef::Time(*id)))
    }

    pub fn contains(&self, unit: &UnitRef) -> bool {
        match unit {
            UnitRef::RecurringCharge(id) => self.recurring_instance_ids.contains(id),
            UnitRef::Mileage(id) => self.mileage_entry_ids.contains(id),
            UnitRef::Time(id) => self.time_entry_ids.contains(id),
        }
    }

    pub fn len(&self) -> usize {
        self.recurring_instance_ids.len() + self.mileage_entry_ids.len() + self.time_entry_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
