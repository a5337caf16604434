//! Recovery for resumed runs
//!
//! A reclaimed run may carry leftovers from the attempt that crashed:
//!
//! - units locked in `billing_pending` but no invoice: released
//! - an invoice already created: the run moves forward on that invoice
//!
//! The invoice check always comes first so a dispatched invoice is never
//! followed by re-locking or re-allocating its units.

use tracing::{info, warn};

use chrono::{DateTime, Utc};
use core_kernel::PortError;

use crate::error::BillingError;
use crate::invoice::{InvoiceRecord, InvoiceStatus};
use crate::ports::{BillableUnitPort, BillingRunPort, InvoicePort};
use crate::run::BillingRun;
use crate::units::SettledStatus;

/// State of a resumed run after the sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeState {
    /// Nothing left behind
    Clean,
    /// Stranded units went back to `unbilled`
    Released { units: usize },
    /// The run already produced this invoice
    Invoiced(InvoiceRecord),
}

/// Finds and repairs what a crashed attempt left behind
pub struct RecoverySweep<'a> {
    runs: &'a dyn BillingRunPort,
    units: &'a dyn BillableUnitPort,
    invoices: &'a dyn InvoicePort,
}

impl<'a> RecoverySweep<'a> {
    pub fn new(
        runs: &'a dyn BillingRunPort,
        units: &'a dyn BillableUnitPort,
        invoices: &'a dyn InvoicePort,
    ) -> Self {
        Self { runs, units, invoices }
    }

    pub async fn sweep(
        &self,
        run: &BillingRun,
        now: DateTime<Utc>,
    ) -> Result<ResumeState, BillingError> {
        if let Some(invoice_id) = run.invoice_id {
            let invoice = self
                .invoices
                .get_invoice(invoice_id)
                .await?
                .ok_or_else(|| PortError::not_found("Invoice", invoice_id))?;
            return Ok(ResumeState::Invoiced(invoice));
        }

        if let Some(invoice) = self.invoices.find_invoice_for_run(run.id).await? {
            warn!(
                run_id = %run.id,
                invoice_id = %invoice.id,
                invoice_number = %invoice.invoice_number,
                "Run lost its invoice link; re-attaching"
            );
            self.runs.attach_invoice(run.id, invoice.id, now).await?;
            return Ok(ResumeState::Invoiced(invoice));
        }

        let released = self.units.release_units(run.id).await?;
        if released > 0 {
            warn!(run_id = %run.id, released, "Released units stranded by a crashed attempt");
            Ok(ResumeState::Released { units: released })
        } else {
            Ok(ResumeState::Clean)
        }
    }
}

/// What to do with a run that already has an invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationAction {
    /// Delivery happened; only bookkeeping is missing
    Reconcile(SettledStatus),
    /// Invoice still in draft; send it
    Redispatch,
}

/// Decides between reconciling and re-sending
pub struct ReconciliationCheck;

impl ReconciliationCheck {
    pub fn decide(invoice: &InvoiceRecord) -> Result<ReconciliationAction, BillingError> {
        match invoice.status {
            status if status.is_dispatched() => {
                Ok(ReconciliationAction::Reconcile(status.settled_unit_status()))
            }
            InvoiceStatus::Draft => Ok(ReconciliationAction::Redispatch),
            _ => Err(BillingError::InvoiceVoided {
                invoice_number: invoice.invoice_number.clone(),
            }),
        }
    }

    /// Brings units in line with an invoice that was already delivered
    pub async fn reconcile(
        units: &dyn BillableUnitPort,
        run: &BillingRun,
        invoice: &InvoiceRecord,
        settled: SettledStatus,
    ) -> Result<usize, BillingError> {
        let settled_units = units.settle_units(run.id, invoice.id, settled).await?;
        info!(
            run_id = %run.id,
            invoice_number = %invoice.invoice_number,
            invoice_status = %invoice.status,
            settled_units,
            "Reconciled run against an already dispatched invoice"
        );
        Ok(settled_units)
    }
}
