//! Invoice drafts and records
//!
//! The engine produces invoices but does not own them. An `InvoiceDraft` is
//! handed to the invoice store, which allocates the number and writes header
//! and lines atomically; what comes back is an `InvoiceRecord`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{BillingRunId, CoreError, InvoiceId, Money, VatRate, VendorId};

use crate::units::{SettledStatus, UnitKind, UnitPrice};

/// Marker placed in internal notes when the full breakdown travels as an
/// attachment instead of in the invoice notes
pub const TIMESHEET_ATTACHMENT_MARKER: &str = "[oj-projects:timesheet-attachment]";

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Created, not yet delivered
    Draft,
    /// Delivered to the vendor
    Sent,
    /// Partial payment received
    PartiallyPaid,
    /// Fully paid
    Paid,
    /// Past due date
    Overdue,
    /// Cancelled by hand
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Void => "void",
        }
    }

    /// Whether the invoice has already reached the vendor
    pub fn is_dispatched(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Sent
                | InvoiceStatus::PartiallyPaid
                | InvoiceStatus::Paid
                | InvoiceStatus::Overdue
        )
    }

    /// Status the invoice's units should carry once reconciled
    pub fn settled_unit_status(&self) -> SettledStatus {
        match self {
            InvoiceStatus::Paid => SettledStatus::Paid,
            _ => SettledStatus::Billed,
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "sent" => Ok(InvoiceStatus::Sent),
            "partially_paid" => Ok(InvoiceStatus::PartiallyPaid),
            "paid" => Ok(InvoiceStatus::Paid),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "void" => Ok(InvoiceStatus::Void),
            other => Err(CoreError::unknown("invoice status", other)),
        }
    }
}

/// A line on an invoice
///
/// A line aggregates priced units. Its net and VAT are the sums of each
/// unit's already-rounded figures, so the invoice totals match the amounts
/// the cap was checked against to the penny.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    /// Description shown to the vendor
    pub description: String,
    /// Which kind of unit this line aggregates
    pub kind: UnitKind,
    /// Quantity
    pub quantity: Decimal,
    /// Unit price ex VAT
    pub unit_price: Money,
    /// VAT rate applied to the line
    pub vat_rate: VatRate,
    /// VAT charged on the line
    pub vat_amount: Money,
}

impl InvoiceLineItem {
    /// Creates a single-quantity line from one priced unit
    pub fn new(description: impl Into<String>, kind: UnitKind, price: UnitPrice, vat_rate: VatRate) -> Self {
        Self::from_prices(description, kind, vat_rate, [price])
    }

    /// Creates a single-quantity line summing the net and VAT of `prices`
    pub fn from_prices(
        description: impl Into<String>,
        kind: UnitKind,
        vat_rate: VatRate,
        prices: impl IntoIterator<Item = UnitPrice>,
    ) -> Self {
        let (net, vat) = prices
            .into_iter()
            .fold((Money::ZERO, Money::ZERO), |(net, vat), price| {
                (net + price.ex_vat, vat + price.vat)
            });
        Self {
            description: description.into(),
            kind,
            quantity: Decimal::ONE,
            unit_price: net,
            vat_rate,
            vat_amount: vat,
        }
    }

    /// Net amount
    pub fn subtotal(&self) -> Money {
        self.unit_price.times(self.quantity)
    }

    pub fn vat(&self) -> Money {
        self.vat_amount
    }

    pub fn total(&self) -> Money {
        self.subtotal() + self.vat()
    }
}

/// Everything needed to create an invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDraft {
    pub vendor_id: VendorId,
    /// Run that produced this invoice, used to rediscover it after a crash
    pub billing_run_id: BillingRunId,
    pub period_key: String,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    /// Customer-facing reference, e.g. "OJ Projects September 2026"
    pub reference: String,
    pub line_items: Vec<InvoiceLineItem>,
    /// Notes printed on the invoice
    pub notes: String,
    /// Notes only staff can see
    pub internal_notes: String,
}

impl InvoiceDraft {
    /// Sum of line nets
    pub fn subtotal(&self) -> Money {
        self.line_items.iter().map(InvoiceLineItem::subtotal).sum()
    }

    /// Sum of line VAT
    pub fn vat_total(&self) -> Money {
        self.line_items.iter().map(InvoiceLineItem::vat).sum()
    }

    pub fn total(&self) -> Money {
        self.subtotal() + self.vat_total()
    }
}

/// An invoice as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: InvoiceId,
    /// Invoice number (human-readable)
    pub invoice_number: String,
    pub vendor_id: VendorId,
    pub billing_run_id: Option<BillingRunId>,
    pub status: InvoiceStatus,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub reference: String,
    pub subtotal: Money,
    pub vat_total: Money,
    pub total: Money,
    pub notes: String,
    pub internal_notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceRecord {
    /// True when the breakdown must be re-rendered as an attachment on send
    pub fn needs_timesheet_attachment(&self) -> bool {
        self.internal_notes.contains(TIMESHEET_ATTACHMENT_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_line_from_one_price() {
        let line = InvoiceLineItem::new(
            "Website rebuild: 10.00 hours",
            UnitKind::Time,
            UnitPrice::new(Money::pounds(dec!(750)), VatRate::standard()),
            VatRate::standard(),
        );
        assert_eq!(line.subtotal(), Money::pounds(dec!(750.00)));
        assert_eq!(line.vat(), Money::pounds(dec!(150.00)));
        assert_eq!(line.total(), Money::pounds(dec!(900.00)));
    }

    #[test]
    fn test_line_sums_rounded_unit_figures() {
        // one minute at 1.20/h: net 0.02, VAT 0.004 rounds to 0.00 per unit
        let minute = UnitPrice::new(Money::new(dec!(0.02)), VatRate::standard());
        let line = InvoiceLineItem::from_prices(
            "Support: 0.17 hours",
            UnitKind::Time,
            VatRate::standard(),
            std::iter::repeat(minute).take(10),
        );
        assert_eq!(line.subtotal(), Money::pounds(dec!(0.20)));
        assert!(line.vat().is_zero());
        assert_eq!(line.quantity, Decimal::ONE);
    }

    #[test]
    fn test_dispatched_statuses() {
        assert!(!InvoiceStatus::Draft.is_dispatched());
        assert!(!InvoiceStatus::Void.is_dispatched());
        assert!(InvoiceStatus::Overdue.is_dispatched());
        assert_eq!(InvoiceStatus::Paid.settled_unit_status(), SettledStatus::Paid);
        assert_eq!(InvoiceStatus::Sent.settled_unit_status(), SettledStatus::Billed);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("partially_paid".parse::<InvoiceStatus>().unwrap(), InvoiceStatus::PartiallyPaid);
        assert!("issued".parse::<InvoiceStatus>().is_err());
    }
}
