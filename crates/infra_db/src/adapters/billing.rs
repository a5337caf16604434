//! PostgreSQL Billing Adapter
//!
//! Implements every storage port of the billing engine on top of the
//! repositories in this crate:
//!
//! - `BillingRunPort` via `BillingRunRepository`
//! - `BillableUnitPort` via `BillableUnitRepository`
//! - `InvoicePort` via `InvoiceRepository`
//! - `VendorDirectoryPort` via `VendorRepository`
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use infra_db::PostgresBillingAdapter;
//!
//! let adapter = Arc::new(PostgresBillingAdapter::new(pool, "INV"));
//! let ports = BillingPorts {
//!     runs: adapter.clone(),
//!     units: adapter.clone(),
//!     invoices: adapter.clone(),
//!     vendors: adapter,
//!     mailer,
//!     renderer,
//! };
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use core_kernel::{
    BillingRunId, DomainPort, HealthCheckResult, HealthCheckable, InvoiceId, Money,
    PortError, VendorId,
};
use domain_billing::run::{NewBillingRun, ReclaimGuard};
use domain_billing::{
    BillableUnit, BillableUnitPort, BillingRun, BillingRunPort, InvoiceDraft, InvoicePort,
    InvoiceRecord, NewRecurringChargeInstance, RecurringCharge, RunStatus, SettledStatus,
    UnitSelection, UnitStatus, VendorBillingSettings, VendorContact, VendorDirectoryPort,
};

use crate::error::DatabaseError;
use crate::repositories::units::{UnitIds, UnitRows};
use crate::repositories::{
    BillableUnitRepository, BillingRunRepository, InvoiceRepository, VendorRepository,
};

const ADAPTER_ID: &str = "postgres-billing-adapter";

/// PostgreSQL-backed implementation of the billing storage ports
///
/// # Error Handling
///
/// Database errors are translated to `PortError` through
/// `From<DatabaseError>`; a unique violation on insert becomes
/// `PortError::Conflict`, which the run ledger treats as "another invocation
/// owns this run".
#[derive(Debug, Clone)]
pub struct PostgresBillingAdapter {
    runs: BillingRunRepository,
    units: BillableUnitRepository,
    invoices: InvoiceRepository,
    vendors: VendorRepository,
    invoice_series: String,
    pool: PgPool,
}

impl PostgresBillingAdapter {
    /// Creates the adapter; invoice numbers are allocated from `invoice_series`
    pub fn new(pool: PgPool, invoice_series: impl Into<String>) -> Self {
        Self {
            runs: BillingRunRepository::new(pool.clone()),
            units: BillableUnitRepository::new(pool.clone()),
            invoices: InvoiceRepository::new(pool.clone()),
            vendors: VendorRepository::new(pool.clone()),
            invoice_series: invoice_series.into(),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl DomainPort for PostgresBillingAdapter {}

#[async_trait]
impl HealthCheckable for PostgresBillingAdapter {
    /// Runs `SELECT 1` against the pool
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();

        let result = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await;

        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => HealthCheckResult::healthy(ADAPTER_ID, latency_ms),
            Err(e) => HealthCheckResult::unhealthy(
                ADAPTER_ID,
                latency_ms,
                format!("Database error: {}", e),
            ),
        }
    }
}

fn to_vendor_ids(ids: Vec<Uuid>) -> Vec<VendorId> {
    ids.into_iter().map(VendorId::from).collect()
}

fn unit_ids(selection: &UnitSelection) -> UnitIds {
    UnitIds {
        recurring_instances: selection
            .recurring_instance_ids
            .iter()
            .map(|id| Uuid::from(*id))
            .collect(),
        mileage_entries: selection
            .mileage_entry_ids
            .iter()
            .map(|id| Uuid::from(*id))
            .collect(),
        time_entries: selection
            .time_entry_ids
            .iter()
            .map(|id| Uuid::from(*id))
            .collect(),
    }
}

fn rows_to_units(rows: UnitRows) -> Result<Vec<BillableUnit>, DatabaseError> {
    let mut units = Vec::with_capacity(
        rows.recurring_instances.len() + rows.mileage_entries.len() + rows.time_entries.len(),
    );
    for row in rows.recurring_instances {
        units.push(BillableUnit::RecurringCharge(row.try_into()?));
    }
    for row in rows.mileage_entries {
        units.push(BillableUnit::Mileage(row.try_into()?));
    }
    for row in rows.time_entries {
        units.push(BillableUnit::Time(row.try_into()?));
    }
    Ok(units)
}

fn settle_sources(target: SettledStatus) -> &'static [UnitStatus] {
    match target {
        SettledStatus::Billed => &[UnitStatus::BillingPending],
        SettledStatus::Paid => &[UnitStatus::BillingPending, UnitStatus::Billed],
    }
}

#[async_trait]
impl BillingRunPort for PostgresBillingAdapter {
    #[instrument(skip(self, run), fields(vendor_id = %run.vendor_id, period_key = %run.period_key))]
    async fn insert_processing_run(&self, run: &NewBillingRun) -> Result<BillingRun, PortError> {
        let row = self
            .runs
            .insert_processing(
                run.id.into(),
                run.vendor_id.into(),
                &run.period_key,
                run.started_at,
            )
            .await?;

        debug!(run_id = %row.id, "Inserted processing run");
        Ok(BillingRun::try_from(row)?)
    }

    #[instrument(skip(self), fields(vendor_id = %vendor_id))]
    async fn find_run(
        &self,
        vendor_id: VendorId,
        period_key: &str,
    ) -> Result<Option<BillingRun>, PortError> {
        let row = self.runs.find(vendor_id.into(), period_key).await?;
        Ok(row.map(BillingRun::try_from).transpose()?)
    }

    #[instrument(skip(self, guard), fields(run_id = %guard.run_id))]
    async fn reclaim_run(
        &self,
        guard: &ReclaimGuard,
        now: DateTime<Utc>,
    ) -> Result<Option<BillingRun>, PortError> {
        let row = self
            .runs
            .reclaim(
                guard.run_id.into(),
                guard.expected_status.as_str(),
                guard.expected_updated_at,
                now,
            )
            .await?;

        if row.is_none() {
            warn!("Run changed since it was read, reclaim skipped");
        }
        Ok(row.map(BillingRun::try_from).transpose()?)
    }

    #[instrument(skip(self, selection), fields(run_id = %run_id, units = selection.len()))]
    async fn record_selection(
        &self,
        run_id: BillingRunId,
        selection: &UnitSelection,
        carried_forward_amount: Option<Money>,
        now: DateTime<Utc>,
    ) -> Result<(), PortError> {
        self.runs
            .record_selection(
                run_id.into(),
                selection,
                carried_forward_amount.map(|amount| amount.amount()),
                now,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(run_id = %run_id, invoice_id = %invoice_id))]
    async fn attach_invoice(
        &self,
        run_id: BillingRunId,
        invoice_id: InvoiceId,
        now: DateTime<Utc>,
    ) -> Result<(), PortError> {
        self.runs
            .attach_invoice(run_id.into(), invoice_id.into(), now)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, error_message), fields(run_id = %run_id, status = %status))]
    async fn finish_run(
        &self,
        run_id: BillingRunId,
        status: RunStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, PortError> {
        let updated = self
            .runs
            .finish(run_id.into(), status.as_str(), error_message, now)
            .await?;
        Ok(updated)
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
    async fn discard_run(&self, run_id: BillingRunId) -> Result<bool, PortError> {
        Ok(self.runs.discard(run_id.into()).await?)
    }

    #[instrument(skip(self, error_message), fields(vendor_id = %vendor_id))]
    async fn record_failed_attempt(
        &self,
        vendor_id: VendorId,
        period_key: &str,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PortError> {
        self.runs
            .record_failed_attempt(Uuid::now_v7(), vendor_id.into(), period_key, error_message, now)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn vendors_with_failed_runs(&self, period_key: &str) -> Result<Vec<VendorId>, PortError> {
        let ids = self
            .runs
            .vendors_with_status(period_key, RunStatus::Failed.as_str())
            .await?;
        Ok(to_vendor_ids(ids))
    }

    #[instrument(skip(self))]
    async fn vendors_with_stale_runs(
        &self,
        period_key: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<VendorId>, PortError> {
        let ids = self
            .runs
            .vendors_with_stale_processing(period_key, stale_before)
            .await?;
        Ok(to_vendor_ids(ids))
    }
}

#[async_trait]
impl BillableUnitPort for PostgresBillingAdapter {
    #[instrument(skip(self))]
    async fn vendors_with_unbilled_entries(&self, through: NaiveDate) -> Result<Vec<VendorId>, PortError> {
        Ok(to_vendor_ids(self.units.vendors_with_unbilled_entries(through).await?))
    }

    #[instrument(skip(self))]
    async fn vendors_with_active_recurring_charges(&self) -> Result<Vec<VendorId>, PortError> {
        Ok(to_vendor_ids(self.units.vendors_with_active_recurring_charges().await?))
    }

    #[instrument(skip(self))]
    async fn vendors_with_unbilled_recurring_instances(
        &self,
        through: NaiveDate,
    ) -> Result<Vec<VendorId>, PortError> {
        Ok(to_vendor_ids(
            self.units.vendors_with_unbilled_recurring_instances(through).await?,
        ))
    }

    #[instrument(skip(self, instances), fields(count = instances.len()))]
    async fn ensure_recurring_instances(
        &self,
        instances: &[NewRecurringChargeInstance],
    ) -> Result<usize, PortError> {
        let created = self.units.ensure_recurring_instances(instances).await?;
        if created > 0 {
            info!(created, "Created recurring charge instances");
        }
        Ok(created as usize)
    }

    #[instrument(skip(self), fields(vendor_id = %vendor_id))]
    async fn load_eligible_units(
        &self,
        vendor_id: VendorId,
        through: NaiveDate,
    ) -> Result<Vec<BillableUnit>, PortError> {
        let rows = self.units.load_eligible(vendor_id.into(), through).await?;
        Ok(rows_to_units(rows)?)
    }

    #[instrument(skip(self, selection), fields(run_id = %run_id, units = selection.len()))]
    async fn claim_units(
        &self,
        run_id: BillingRunId,
        selection: &UnitSelection,
    ) -> Result<usize, PortError> {
        let claimed = self.units.claim(run_id.into(), &unit_ids(selection)).await?;
        Ok(claimed as usize)
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
    async fn release_units(&self, run_id: BillingRunId) -> Result<usize, PortError> {
        let released = self.units.release(run_id.into()).await?;
        if released > 0 {
            warn!(released, "Released units locked by run");
        }
        Ok(released as usize)
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
    async fn pending_units(&self, run_id: BillingRunId) -> Result<Vec<BillableUnit>, PortError> {
        let rows = self.units.pending(run_id.into()).await?;
        Ok(rows_to_units(rows)?)
    }

    #[instrument(skip(self), fields(run_id = %run_id, invoice_id = %invoice_id))]
    async fn settle_units(
        &self,
        run_id: BillingRunId,
        invoice_id: InvoiceId,
        status: SettledStatus,
    ) -> Result<usize, PortError> {
        let settled = self
            .units
            .settle(
                run_id.into(),
                invoice_id.into(),
                status.as_unit_status(),
                settle_sources(status),
            )
            .await?;
        Ok(settled as usize)
    }
}

#[async_trait]
impl InvoicePort for PostgresBillingAdapter {
    #[instrument(skip(self, draft), fields(vendor_id = %draft.vendor_id, run_id = %draft.billing_run_id))]
    async fn create_invoice(&self, draft: &InvoiceDraft) -> Result<InvoiceRecord, PortError> {
        let row = self
            .invoices
            .create(draft, &self.invoice_series, Utc::now())
            .await?;

        info!(invoice_number = %row.invoice_number, "Created invoice");
        Ok(InvoiceRecord::try_from(row)?)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Option<InvoiceRecord>, PortError> {
        let row = self.invoices.get(invoice_id.into()).await?;
        Ok(row.map(InvoiceRecord::try_from).transpose()?)
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
    async fn find_invoice_for_run(&self, run_id: BillingRunId) -> Result<Option<InvoiceRecord>, PortError> {
        let row = self.invoices.find_for_run(run_id.into()).await?;
        Ok(row.map(InvoiceRecord::try_from).transpose()?)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn mark_invoice_sent(&self, invoice_id: InvoiceId, now: DateTime<Utc>) -> Result<(), PortError> {
        self.invoices.mark_sent(invoice_id.into(), now).await?;
        Ok(())
    }
}

#[async_trait]
impl VendorDirectoryPort for PostgresBillingAdapter {
    #[instrument(skip(self), fields(vendor_id = %vendor_id))]
    async fn billing_settings(&self, vendor_id: VendorId) -> Result<Option<VendorBillingSettings>, PortError> {
        let row = self.vendors.settings(vendor_id.into()).await?;
        Ok(row.map(VendorBillingSettings::try_from).transpose()?)
    }

    #[instrument(skip(self), fields(vendor_id = %vendor_id))]
    async fn contacts(&self, vendor_id: VendorId) -> Result<Vec<VendorContact>, PortError> {
        let rows = self.vendors.contacts(vendor_id.into()).await?;
        Ok(rows.into_iter().map(VendorContact::from).collect())
    }

    #[instrument(skip(self), fields(vendor_id = %vendor_id))]
    async fn active_recurring_charges(&self, vendor_id: VendorId) -> Result<Vec<RecurringCharge>, PortError> {
        let rows = self.vendors.active_recurring_charges(vendor_id.into()).await?;
        Ok(rows.into_iter().map(RecurringCharge::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::{MileageEntryId, TimeEntryId};
    use domain_billing::UnitRef;

    #[test]
    fn test_selection_splits_per_table() {
        let mut selection = UnitSelection::default();
        selection.push(UnitRef::Time(TimeEntryId::new()));
        selection.push(UnitRef::Time(TimeEntryId::new()));
        selection.push(UnitRef::Mileage(MileageEntryId::new()));

        let ids = unit_ids(&selection);

        assert_eq!(ids.time_entries.len(), 2);
        assert_eq!(ids.mileage_entries.len(), 1);
        assert!(ids.recurring_instances.is_empty());
    }

    #[test]
    fn test_paid_settle_also_moves_billed_units() {
        assert_eq!(settle_sources(SettledStatus::Billed), &[UnitStatus::BillingPending]);
        assert_eq!(
            settle_sources(SettledStatus::Paid),
            &[UnitStatus::BillingPending, UnitStatus::Billed]
        );
    }
}
