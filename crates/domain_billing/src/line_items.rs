//! Line items and invoice notes
//!
//! Selected units are aggregated into lines the vendor can audit:
//!
//! - one line per recurring charge instance, using its snapshot
//! - one mileage line, miles and rate in the text
//! - one time line per `(project, VAT rate)`, hours in the text
//!
//! Every line is quantity 1 and carries the summed net and VAT of its units.
//!
//! Alongside the lines a notes document is produced in a full and a compact
//! form. When the full form does not fit the notes budget, the invoice
//! carries the compact form and the full form goes out as an attachment.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use rust_decimal::Decimal;

use core_kernel::{BillingRunId, Money, ProjectId, VatRate};

use crate::allocation::Allocation;
use crate::invoice::{InvoiceLineItem, TIMESHEET_ATTACHMENT_MARKER};
use crate::period::BillingPeriod;
use crate::settings::AllocationPolicy;
use crate::units::{
    BillableUnit, MileageEntry, RecurringChargeInstance, TimeEntry, UnitKind, UnitPrice,
};

/// Default character budget for notes printed on the invoice
pub const DEFAULT_NOTES_CHAR_BUDGET: usize = 2000;

const NO_PROJECT: &str = "General";

/// Lines and notes for one invoice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceContent {
    pub line_items: Vec<InvoiceLineItem>,
    pub notes: InvoiceNotes,
}

/// Notes document in both renderings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceNotes {
    pub full: String,
    pub compact: String,
    /// Full form exceeded the budget and must be attached
    pub attach_timesheet: bool,
}

impl InvoiceNotes {
    /// The text printed on the invoice
    pub fn printed(&self) -> &str {
        if self.attach_timesheet {
            &self.compact
        } else {
            &self.full
        }
    }

    /// Staff-only notes tying the invoice to its run
    pub fn internal(&self, run_id: BillingRunId) -> String {
        let mut internal = format!("billing_run:{}", run_id);
        if self.attach_timesheet {
            internal.push('\n');
            internal.push_str(TIMESHEET_ATTACHMENT_MARKER);
        }
        internal
    }
}

/// Builds invoice lines and notes
#[derive(Debug, Clone)]
pub struct LineItemBuilder {
    notes_char_budget: usize,
}

impl Default for LineItemBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_NOTES_CHAR_BUDGET)
    }
}

#[derive(Debug, Default)]
struct TimeBucket<'a> {
    project_name: &'a str,
    vat_rate: VatRate,
    minutes: u64,
    net: Money,
    prices: Vec<UnitPrice>,
    entries: Vec<&'a TimeEntry>,
}

#[derive(Debug, Default)]
struct MileageGroup<'a> {
    project_name: &'a str,
    miles: Decimal,
    net: Money,
    entries: Vec<&'a MileageEntry>,
}

/// Units split by kind, each list in allocation order
#[derive(Debug, Default)]
struct Partitioned<'a> {
    recurring: Vec<&'a RecurringChargeInstance>,
    mileage: Vec<&'a MileageEntry>,
    time: Vec<&'a TimeEntry>,
}

impl<'a> Partitioned<'a> {
    fn from_units(units: &'a [BillableUnit]) -> Self {
        let mut parts = Self::default();
        for unit in units {
            match unit {
                BillableUnit::RecurringCharge(u) => parts.recurring.push(u),
                BillableUnit::Mileage(u) => parts.mileage.push(u),
                BillableUnit::Time(u) => parts.time.push(u),
            }
        }
        parts
    }

    fn time_buckets(&self) -> BTreeMap<(&'a str, Option<ProjectId>, VatRate), TimeBucket<'a>> {
        let mut buckets: BTreeMap<_, TimeBucket<'a>> = BTreeMap::new();
        for &entry in &self.time {
            let key = (entry.project_name.as_str(), Some(entry.project_id), entry.vat_rate);
            let bucket = buckets.entry(key).or_insert_with(|| TimeBucket {
                project_name: entry.project_name.as_str(),
                vat_rate: entry.vat_rate,
                ..Default::default()
            });
            let price = entry.price();
            bucket.minutes += u64::from(entry.duration_minutes);
            bucket.net += price.ex_vat;
            bucket.prices.push(price);
            bucket.entries.push(entry);
        }
        buckets
    }

    fn mileage_groups(&self) -> BTreeMap<&'a str, MileageGroup<'a>> {
        let mut groups: BTreeMap<&str, MileageGroup<'a>> = BTreeMap::new();
        for &entry in &self.mileage {
            let name = entry.project_name.as_deref().unwrap_or(NO_PROJECT);
            let group = groups.entry(name).or_insert_with(|| MileageGroup {
                project_name: name,
                ..Default::default()
            });
            group.miles += entry.miles;
            group.net += entry.price().ex_vat;
            group.entries.push(entry);
        }
        groups
    }
}

impl LineItemBuilder {
    pub fn new(notes_char_budget: usize) -> Self {
        Self { notes_char_budget }
    }

    /// Builds lines from the selected units and notes from the whole allocation
    pub fn build(
        &self,
        period: &BillingPeriod,
        allocation: &Allocation,
        policy: &AllocationPolicy,
    ) -> InvoiceContent {
        let selected = Partitioned::from_units(&allocation.selected);
        InvoiceContent {
            line_items: Self::line_items(&selected),
            notes: self.notes(period, allocation, policy),
        }
    }

    /// Builds only the notes, e.g. when re-sending an existing invoice
    pub fn notes(
        &self,
        period: &BillingPeriod,
        allocation: &Allocation,
        policy: &AllocationPolicy,
    ) -> InvoiceNotes {
        let selected = Partitioned::from_units(&allocation.selected);
        let full = render_notes(period, &selected, allocation, policy, true);
        let compact = render_notes(period, &selected, allocation, policy, false);
        let attach_timesheet = full.chars().count() > self.notes_char_budget;
        InvoiceNotes {
            full,
            compact,
            attach_timesheet,
        }
    }

    fn line_items(selected: &Partitioned<'_>) -> Vec<InvoiceLineItem> {
        let mut lines = Vec::new();

        for instance in &selected.recurring {
            lines.push(InvoiceLineItem::new(
                instance.description.clone(),
                UnitKind::RecurringCharge,
                instance.price(),
                instance.vat_rate,
            ));
        }

        if let Some(line) = mileage_line(&selected.mileage) {
            lines.push(line);
        }

        let buckets = selected.time_buckets();
        let mut projects_with_rates: BTreeMap<&str, usize> = BTreeMap::new();
        for (name, _, _) in buckets.keys() {
            *projects_with_rates.entry(*name).or_default() += 1;
        }
        for bucket in buckets.values() {
            let mut description = format!(
                "{}: {} hours",
                bucket.project_name,
                format_hours(bucket.minutes)
            );
            if projects_with_rates.get(bucket.project_name).copied().unwrap_or(0) > 1 {
                let _ = write!(description, " (VAT {})", bucket.vat_rate);
            }
            lines.push(InvoiceLineItem::from_prices(
                description,
                UnitKind::Time,
                bucket.vat_rate,
                bucket.prices.iter().copied(),
            ));
        }

        lines
    }
}

fn mileage_line(entries: &[&MileageEntry]) -> Option<InvoiceLineItem> {
    let first = entries.first()?;
    let miles: Decimal = entries.iter().map(|e| e.miles).sum();
    let single_rate = entries.iter().all(|e| e.mileage_rate == first.mileage_rate);

    let description = if single_rate {
        format!("Mileage: {} miles @ {}/mile", miles.normalize(), first.mileage_rate)
    } else {
        format!("Mileage: {} miles (multiple rates)", miles.normalize())
    };
    Some(InvoiceLineItem::from_prices(
        description,
        UnitKind::Mileage,
        VatRate::ZERO,
        entries.iter().map(|e| e.price()),
    ))
}

fn format_hours(minutes: u64) -> String {
    let hours = Decimal::from(minutes) / Decimal::from(60);
    format!("{:.2}", hours.round_dp(2))
}

fn render_notes(
    period: &BillingPeriod,
    selected: &Partitioned<'_>,
    allocation: &Allocation,
    policy: &AllocationPolicy,
    detailed: bool,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Billing period: {} ({} to {})",
        period.label(),
        period.start_date,
        period.end_date
    );

    if !selected.recurring.is_empty() {
        let _ = writeln!(out, "\nRecurring charges:");
        for instance in &selected.recurring {
            let _ = writeln!(
                out,
                "- {}: {} ex VAT",
                instance.description,
                instance.amount_ex_vat.round_pence()
            );
        }
    }

    let buckets = selected.time_buckets();
    if !buckets.is_empty() {
        let _ = writeln!(out, "\nTime:");
        for bucket in buckets.values() {
            let _ = writeln!(
                out,
                "- {}: {} hours ({} ex VAT)",
                bucket.project_name,
                format_hours(bucket.minutes),
                bucket.net
            );
            if detailed {
                for entry in &bucket.entries {
                    let _ = write!(
                        out,
                        "  - {} {} h",
                        entry.entry_date,
                        format_hours(u64::from(entry.duration_minutes))
                    );
                    if let Some(description) = entry.description.as_deref() {
                        let _ = write!(out, " {}", description);
                    }
                    out.push('\n');
                }
            }
        }
    }

    let groups = selected.mileage_groups();
    if !groups.is_empty() {
        let _ = writeln!(out, "\nMileage:");
        for group in groups.values() {
            let _ = writeln!(
                out,
                "- {}: {} miles ({})",
                group.project_name,
                group.miles.normalize(),
                group.net
            );
            if detailed {
                for entry in &group.entries {
                    let _ = write!(
                        out,
                        "  - {} {} miles @ {}",
                        entry.entry_date,
                        entry.miles.normalize(),
                        entry.mileage_rate
                    );
                    if let Some(description) = entry.description.as_deref() {
                        let _ = write!(out, " {}", description);
                    }
                    out.push('\n');
                }
            }
        }
    }

    if let AllocationPolicy::Cap { cap_inc_vat } = policy {
        let _ = writeln!(
            out,
            "\nMonthly cap: {} inc VAT, billed this period: {} inc VAT",
            cap_inc_vat, allocation.selected_total
        );
        if !allocation.deferred.is_empty() {
            let _ = writeln!(
                out,
                "Carried forward (not yet billed): {} item(s), {} inc VAT",
                allocation.deferred.len(),
                allocation.carried_forward_total
            );
            if detailed {
                for unit in &allocation.deferred {
                    let _ = writeln!(
                        out,
                        "  - {} {}: {} inc VAT",
                        unit.effective_date(),
                        deferred_label(unit),
                        unit.price().inc_vat
                    );
                }
            }
        }
    }

    out.trim_end().to_string()
}

fn deferred_label(unit: &BillableUnit) -> String {
    match unit {
        BillableUnit::RecurringCharge(u) => u.description.clone(),
        BillableUnit::Mileage(u) => format!(
            "{} mileage, {} miles",
            u.project_name.as_deref().unwrap_or(NO_PROJECT),
            u.miles.normalize()
        ),
        BillableUnit::Time(u) => format!(
            "{} time, {} h",
            u.project_name,
            format_hours(u64::from(u.duration_minutes))
        ),
    }
}
