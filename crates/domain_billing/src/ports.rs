//! Billing Domain Ports
//!
//! The engine reaches its data store and its delivery collaborators only
//! through these traits. Every mutual-exclusion guarantee the engine relies on
//! is pushed down to the implementations:
//!
//! - `insert_processing_run` must fail with `PortError::Conflict` on the
//!   `(vendor_id, period_key)` unique key
//! - `reclaim_run`, `finish_run` and `discard_run` are conditional updates
//! - `claim_units` only touches units that are still `unbilled`
//! - `create_invoice` writes header and lines in one transaction
//!
//! # Adapters
//!
//! - **PostgreSQL**: `infra_db::PostgresBillingAdapter`
//! - **In-memory**: `domain_billing::mock::InMemoryBillingStore` (feature `mock`)

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use core_kernel::{BillingRunId, DomainPort, InvoiceId, Money, PortError, VendorId};

use crate::dispatch::{Attachment, DeliveryReceipt, InvoiceEmail, TimesheetDocument};
use crate::invoice::{InvoiceDraft, InvoiceRecord};
use crate::run::{BillingRun, NewBillingRun, ReclaimGuard, RunStatus};
use crate::settings::{VendorBillingSettings, VendorContact};
use crate::units::{BillableUnit, NewRecurringChargeInstance, RecurringCharge, SettledStatus, UnitSelection};

/// Storage for billing run rows
#[async_trait]
pub trait BillingRunPort: DomainPort {
    /// Inserts a `processing` row
    ///
    /// Returns `PortError::Conflict` when a row already exists for the
    /// vendor and period.
    async fn insert_processing_run(&self, run: &NewBillingRun) -> Result<BillingRun, PortError>;

    /// Reads the row for a vendor and period
    async fn find_run(
        &self,
        vendor_id: VendorId,
        period_key: &str,
    ) -> Result<Option<BillingRun>, PortError>;

    /// Moves a `failed` or stale `processing` row back to `processing`
    ///
    /// Only succeeds if the row still matches `guard`. Returns `None` when
    /// another invocation got there first.
    async fn reclaim_run(
        &self,
        guard: &ReclaimGuard,
        now: DateTime<Utc>,
    ) -> Result<Option<BillingRun>, PortError>;

    /// Stores the unit snapshot and carried-forward amount for the attempt
    async fn record_selection(
        &self,
        run_id: BillingRunId,
        selection: &UnitSelection,
        carried_forward_amount: Option<Money>,
        now: DateTime<Utc>,
    ) -> Result<(), PortError>;

    /// Links the run to its invoice
    async fn attach_invoice(
        &self,
        run_id: BillingRunId,
        invoice_id: InvoiceId,
        now: DateTime<Utc>,
    ) -> Result<(), PortError>;

    /// Terminal write, only applied while the row is `processing`
    ///
    /// Returns whether a row was updated.
    async fn finish_run(
        &self,
        run_id: BillingRunId,
        status: RunStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, PortError>;

    /// Deletes a `processing` row that never got an invoice
    async fn discard_run(&self, run_id: BillingRunId) -> Result<bool, PortError>;

    /// Records a failure for a vendor whose attempt never owned a row
    ///
    /// Inserts a `failed` row, or refreshes the message of an existing
    /// `failed` row. Rows in any other state are left alone.
    async fn record_failed_attempt(
        &self,
        vendor_id: VendorId,
        period_key: &str,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PortError>;

    /// Vendors whose run for `period_key` ended `failed`
    async fn vendors_with_failed_runs(&self, period_key: &str) -> Result<Vec<VendorId>, PortError>;

    /// Vendors whose run for `period_key` is still `processing` with no
    /// heartbeat since `stale_before`
    async fn vendors_with_stale_runs(
        &self,
        period_key: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<VendorId>, PortError>;
}

/// Storage for time entries, mileage entries and recurring charge instances
#[async_trait]
pub trait BillableUnitPort: DomainPort {
    /// Vendors with unbilled time or mileage dated on or before `through`
    async fn vendors_with_unbilled_entries(&self, through: NaiveDate) -> Result<Vec<VendorId>, PortError>;

    /// Vendors with an active recurring charge definition
    async fn vendors_with_active_recurring_charges(&self) -> Result<Vec<VendorId>, PortError>;

    /// Vendors with an unbilled recurring charge instance ending on or before `through`
    async fn vendors_with_unbilled_recurring_instances(
        &self,
        through: NaiveDate,
    ) -> Result<Vec<VendorId>, PortError>;

    /// Insert-if-absent on `(vendor_id, recurring_charge_id, period_key)`
    ///
    /// Returns how many instances were newly created.
    async fn ensure_recurring_instances(
        &self,
        instances: &[NewRecurringChargeInstance],
    ) -> Result<usize, PortError>;

    /// Every `unbilled` unit for the vendor dated on or before `through`
    async fn load_eligible_units(
        &self,
        vendor_id: VendorId,
        through: NaiveDate,
    ) -> Result<Vec<BillableUnit>, PortError>;

    /// `unbilled -> billing_pending` for the selection, tagged with `run_id`
    ///
    /// Returns how many units were claimed; a unit claimed elsewhere in the
    /// meantime is not counted.
    async fn claim_units(
        &self,
        run_id: BillingRunId,
        selection: &UnitSelection,
    ) -> Result<usize, PortError>;

    /// `billing_pending -> unbilled` for every unit tagged with `run_id`
    async fn release_units(&self, run_id: BillingRunId) -> Result<usize, PortError>;

    /// Units still `billing_pending` under `run_id`
    async fn pending_units(&self, run_id: BillingRunId) -> Result<Vec<BillableUnit>, PortError>;

    /// Finalizes every unit tagged with `run_id` against `invoice_id`
    async fn settle_units(
        &self,
        run_id: BillingRunId,
        invoice_id: InvoiceId,
        status: SettledStatus,
    ) -> Result<usize, PortError>;
}

/// The invoicing subsystem
#[async_trait]
pub trait InvoicePort: DomainPort {
    /// Creates header and lines atomically and allocates the invoice number
    async fn create_invoice(&self, draft: &InvoiceDraft) -> Result<InvoiceRecord, PortError>;

    async fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Option<InvoiceRecord>, PortError>;

    /// Finds the invoice a run created, if any
    async fn find_invoice_for_run(&self, run_id: BillingRunId) -> Result<Option<InvoiceRecord>, PortError>;

    /// `draft -> sent`
    async fn mark_invoice_sent(&self, invoice_id: InvoiceId, now: DateTime<Utc>) -> Result<(), PortError>;
}

/// Vendor billing configuration
#[async_trait]
pub trait VendorDirectoryPort: DomainPort {
    async fn billing_settings(&self, vendor_id: VendorId) -> Result<Option<VendorBillingSettings>, PortError>;

    async fn contacts(&self, vendor_id: VendorId) -> Result<Vec<VendorContact>, PortError>;

    async fn active_recurring_charges(&self, vendor_id: VendorId) -> Result<Vec<RecurringCharge>, PortError>;
}

/// Email delivery
#[async_trait]
pub trait InvoiceMailer: DomainPort {
    /// False when the service has no credentials to send with
    fn is_configured(&self) -> bool;

    async fn send(&self, email: &InvoiceEmail) -> Result<DeliveryReceipt, PortError>;
}

/// Renders the full breakdown as an attachment
pub trait TimesheetRenderer: DomainPort {
    fn render(&self, document: &TimesheetDocument) -> Result<Attachment, PortError>;
}
