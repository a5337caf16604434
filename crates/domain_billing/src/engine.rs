//! Billing run orchestration
//!
//! One invocation bills the previous month for every candidate vendor, one
//! vendor at a time. Each vendor goes through the same pipeline:
//!
//! ```text
//! acquire ─▶ recovery sweep ─▶ reconciliation check ─▶ load ─▶ allocate
//!         ─▶ claim ─▶ build lines ─▶ create invoice ─▶ dispatch ─▶ resolve
//! ```
//!
//! A failure for one vendor is recorded on its run and never stops the batch.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use core_kernel::{Clock, InvoiceId, SystemClock, Timezone, VendorId};

use crate::allocation::{Allocation, CapAllocator};
use crate::dispatch::{InvoiceEmail, Recipients, TimesheetDocument};
use crate::error::{BillingError, FailureKind};
use crate::invoice::{InvoiceDraft, InvoiceRecord};
use crate::ledger::{Acquisition, RunLedger};
use crate::line_items::{InvoiceContent, LineItemBuilder, DEFAULT_NOTES_CHAR_BUDGET};
use crate::period::{self, BillingPeriod};
use crate::ports::{
    BillableUnitPort, BillingRunPort, InvoiceMailer, InvoicePort, TimesheetRenderer,
    VendorDirectoryPort,
};
use crate::recovery::{ReconciliationAction, ReconciliationCheck, RecoverySweep, ResumeState};
use crate::run::{AcquireOrigin, BillingRun, RunResolution, DEFAULT_LIVENESS_WINDOW_MINUTES};
use crate::settings::{AllocationPolicy, VendorBillingSettings};
use crate::units::{BillableUnit, SettledStatus, UnitSelection};

/// Skip reason: the period is already billed
pub const SKIP_ALREADY_SENT: &str = "already_sent";
/// Skip reason: another invocation owns the run
pub const SKIP_IN_FLIGHT: &str = "in_progress";
/// Skip reason: nothing eligible for the vendor
pub const SKIP_NOTHING_TO_BILL: &str = "nothing_to_bill";
/// Trigger gate reason
pub const NOT_FIRST_OF_MONTH: &str = "not_first_of_month";

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Business time zone for periods and invoice dates
    pub timezone: Timezone,
    /// How long a `processing` run may go quiet before it is reclaimed
    pub liveness_window: Duration,
    /// Character budget for notes printed on the invoice
    pub notes_char_budget: usize,
    /// Default payment terms
    pub payment_terms_days: u32,
    /// Signature on invoice emails
    pub sender_name: String,
    /// Prefix of the customer-facing invoice reference
    pub reference_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: Timezone::london(),
            liveness_window: Duration::minutes(DEFAULT_LIVENESS_WINDOW_MINUTES),
            notes_char_budget: DEFAULT_NOTES_CHAR_BUDGET,
            payment_terms_days: 30,
            sender_name: "Orange Jelly".to_string(),
            reference_prefix: "OJ Projects".to_string(),
        }
    }
}

/// Collaborators the engine runs against
#[derive(Clone)]
pub struct BillingPorts {
    pub runs: Arc<dyn BillingRunPort>,
    pub units: Arc<dyn BillableUnitPort>,
    pub invoices: Arc<dyn InvoicePort>,
    pub vendors: Arc<dyn VendorDirectoryPort>,
    pub mailer: Arc<dyn InvoiceMailer>,
    pub renderer: Arc<dyn TimesheetRenderer>,
}

impl BillingPorts {
    /// Wires one store that serves every storage port
    pub fn from_store<S>(
        store: Arc<S>,
        mailer: Arc<dyn InvoiceMailer>,
        renderer: Arc<dyn TimesheetRenderer>,
    ) -> Self
    where
        S: BillingRunPort + BillableUnitPort + InvoicePort + VendorDirectoryPort,
    {
        Self {
            runs: store.clone(),
            units: store.clone(),
            invoices: store.clone(),
            vendors: store,
            mailer,
            renderer,
        }
    }
}

/// Trigger flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerOptions {
    /// Run even when it is not the first of the month
    pub force: bool,
}

/// Per-vendor terminal status in the summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorRunStatus {
    Sent,
    Skipped,
    Failed,
}

/// One vendor's line in the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VendorResult {
    pub vendor_id: VendorId,
    pub status: VendorRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<InvoiceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VendorResult {
    fn sent(vendor_id: VendorId, invoice: &InvoiceRecord) -> Self {
        Self {
            vendor_id,
            status: VendorRunStatus::Sent,
            invoice_id: Some(invoice.id),
            invoice_number: Some(invoice.invoice_number.clone()),
            error: None,
            failure_kind: None,
            reason: None,
        }
    }

    fn skipped(vendor_id: VendorId, reason: &str) -> Self {
        Self {
            vendor_id,
            status: VendorRunStatus::Skipped,
            invoice_id: None,
            invoice_number: None,
            error: None,
            failure_kind: None,
            reason: Some(reason.to_string()),
        }
    }

    fn failed(vendor_id: VendorId, error: &BillingError, invoice: Option<&InvoiceRecord>) -> Self {
        Self {
            vendor_id,
            status: VendorRunStatus::Failed,
            invoice_id: invoice.map(|i| i.id),
            invoice_number: invoice.map(|i| i.invoice_number.clone()),
            error: Some(error.to_string()),
            failure_kind: Some(error.kind()),
            reason: None,
        }
    }

    fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

/// JSON summary of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingRunSummary {
    /// `YYYY-MM` of the billed month
    pub period: String,
    pub invoice_date: NaiveDate,
    pub processed: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub vendors: Vec<VendorResult>,
}

impl BillingRunSummary {
    fn new(period: &BillingPeriod, invoice_date: NaiveDate) -> Self {
        Self {
            period: period.period_key.clone(),
            invoice_date,
            processed: 0,
            sent: 0,
            skipped: 0,
            failed: 0,
            vendors: Vec::new(),
        }
    }

    fn record(&mut self, result: VendorResult) {
        self.processed += 1;
        match result.status {
            VendorRunStatus::Sent => self.sent += 1,
            VendorRunStatus::Skipped => self.skipped += 1,
            VendorRunStatus::Failed => self.failed += 1,
        }
        self.vendors.push(result);
    }

    pub fn vendor(&self, vendor_id: VendorId) -> Option<&VendorResult> {
        self.vendors.iter().find(|v| v.vendor_id == vendor_id)
    }
}

/// Body returned when the trigger gate declines to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotScheduled {
    pub skipped: bool,
    pub reason: &'static str,
    pub local_date: NaiveDate,
}

/// What an invocation did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BillingRunOutcome {
    NotScheduled(NotScheduled),
    Completed(BillingRunSummary),
}

/// How a vendor attempt that did not fail ended
enum VendorAttempt {
    Sent(InvoiceRecord),
    Reconciled(InvoiceRecord),
    NothingToBill,
}

/// Per-invocation values shared by every vendor
struct RunContext<'a> {
    period: &'a BillingPeriod,
    invoice_date: NaiveDate,
}

/// The recurring billing run engine
///
/// Timestamps written to the run ledger come from the engine's clock at the
/// moment of each write, not from the trigger instant, so a vendor reached
/// late in a long batch carries a fresh heartbeat.
pub struct BillingRunEngine {
    ports: BillingPorts,
    ledger: RunLedger,
    builder: LineItemBuilder,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl BillingRunEngine {
    pub fn new(ports: BillingPorts, config: EngineConfig) -> Self {
        let ledger = RunLedger::new(ports.runs.clone()).with_liveness_window(config.liveness_window);
        let builder = LineItemBuilder::new(config.notes_char_budget);
        Self {
            ports,
            ledger,
            builder,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the wall clock used for run heartbeats and invoice stamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// True on the first day of the month in the business time zone
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        period::is_billing_day(now, &self.config.timezone)
    }

    /// Bills the month before `now` for every candidate vendor
    ///
    /// Only fails when the candidate set cannot be built; per-vendor failures
    /// are reported in the summary.
    pub async fn run(
        &self,
        now: DateTime<Utc>,
        options: TriggerOptions,
    ) -> Result<BillingRunOutcome, BillingError> {
        let tz = &self.config.timezone;
        if !options.force && !self.should_run(now) {
            let local_date = tz.local_date(now);
            info!(%local_date, "Not the first of the month; billing run skipped");
            return Ok(BillingRunOutcome::NotScheduled(NotScheduled {
                skipped: true,
                reason: NOT_FIRST_OF_MONTH,
                local_date,
            }));
        }

        let period = BillingPeriod::previous_month(now, tz)?;
        let ctx = RunContext {
            period: &period,
            invoice_date: period::invoice_date(now, tz),
        };

        let vendors = self.candidate_vendors(&period, now).await?;
        info!(
            period_key = %period.period_key,
            vendors = vendors.len(),
            forced = options.force,
            "Billing run starting"
        );

        let mut summary = BillingRunSummary::new(&period, ctx.invoice_date);
        for vendor_id in vendors {
            let result = self.bill_vendor(vendor_id, &ctx).await;
            summary.record(result);
        }

        info!(
            period_key = %summary.period,
            processed = summary.processed,
            sent = summary.sent,
            skipped = summary.skipped,
            failed = summary.failed,
            "Billing run finished"
        );
        Ok(BillingRunOutcome::Completed(summary))
    }

    /// Union of every vendor with something outstanding for the period,
    /// including vendors whose run crashed and has gone stale
    pub async fn candidate_vendors(
        &self,
        period: &BillingPeriod,
        now: DateTime<Utc>,
    ) -> Result<BTreeSet<VendorId>, BillingError> {
        let units = &self.ports.units;
        let mut vendors = BTreeSet::new();
        vendors.extend(units.vendors_with_unbilled_entries(period.end_date).await?);
        vendors.extend(units.vendors_with_active_recurring_charges().await?);
        vendors.extend(
            units
                .vendors_with_unbilled_recurring_instances(period.end_date)
                .await?,
        );
        vendors.extend(
            self.ports
                .runs
                .vendors_with_failed_runs(&period.period_key)
                .await?,
        );
        vendors.extend(
            self.ports
                .runs
                .vendors_with_stale_runs(&period.period_key, now - self.config.liveness_window)
                .await?,
        );
        Ok(vendors)
    }

    async fn bill_vendor(&self, vendor_id: VendorId, ctx: &RunContext<'_>) -> VendorResult {
        let period_key = ctx.period.period_key.as_str();

        let acquisition = match self.ledger.acquire(vendor_id, period_key, self.clock.now()).await {
            Ok(acquisition) => acquisition,
            Err(error) => {
                error!(%vendor_id, period_key, %error, "Could not acquire billing run");
                if let Err(record_error) = self
                    .ledger
                    .record_failed_attempt(vendor_id, period_key, &error.to_string(), self.clock.now())
                    .await
                {
                    error!(%vendor_id, period_key, error = %record_error, "Could not record failed billing run");
                }
                return VendorResult::failed(vendor_id, &error, None);
            }
        };

        let (run, origin) = match acquisition {
            Acquisition::AlreadySent(run) => {
                let mut result = VendorResult::skipped(vendor_id, SKIP_ALREADY_SENT);
                result.invoice_id = run.invoice_id;
                return result;
            }
            Acquisition::InFlight(_) => return VendorResult::skipped(vendor_id, SKIP_IN_FLIGHT),
            Acquisition::Acquired { run, origin } => (run, origin),
        };

        let mut invoice = None;
        let attempt = self.process_vendor(&run, origin, ctx, &mut invoice).await;

        let (resolution, result) = match attempt {
            Ok(VendorAttempt::Sent(invoice)) => {
                (RunResolution::Sent, VendorResult::sent(vendor_id, &invoice))
            }
            Ok(VendorAttempt::Reconciled(invoice)) => (
                RunResolution::Sent,
                VendorResult::sent(vendor_id, &invoice).with_reason("reconciled"),
            ),
            Ok(VendorAttempt::NothingToBill) => (
                RunResolution::Discard,
                VendorResult::skipped(vendor_id, SKIP_NOTHING_TO_BILL),
            ),
            Err(error) => {
                let kind = error.kind();
                error!(
                    %vendor_id,
                    period_key,
                    run_id = %run.id,
                    failure_kind = ?kind,
                    %error,
                    "Billing run failed"
                );
                (
                    RunResolution::Failed {
                        message: error.to_string(),
                        kind,
                    },
                    VendorResult::failed(vendor_id, &error, invoice.as_ref()),
                )
            }
        };

        if let Err(error) = self.ledger.resolve(&run, resolution, self.clock.now()).await {
            error!(
                %vendor_id,
                run_id = %run.id,
                %error,
                "Could not write terminal run state; the run will be reclaimed once stale"
            );
            return VendorResult {
                status: VendorRunStatus::Failed,
                error: Some(error.to_string()),
                failure_kind: Some(error.kind()),
                ..result
            };
        }
        result
    }

    #[instrument(
        skip(self, run, ctx, invoice_slot),
        fields(vendor_id = %run.vendor_id, period_key = %run.period_key, run_id = %run.id)
    )]
    async fn process_vendor(
        &self,
        run: &BillingRun,
        origin: AcquireOrigin,
        ctx: &RunContext<'_>,
        invoice_slot: &mut Option<InvoiceRecord>,
    ) -> Result<VendorAttempt, BillingError> {
        let vendor_id = run.vendor_id;
        let settings = self
            .ports
            .vendors
            .billing_settings(vendor_id)
            .await?
            .unwrap_or_else(|| VendorBillingSettings::defaults_for(vendor_id));

        if origin != AcquireOrigin::Fresh {
            let sweep = RecoverySweep::new(
                self.ports.runs.as_ref(),
                self.ports.units.as_ref(),
                self.ports.invoices.as_ref(),
            );
            if let ResumeState::Invoiced(invoice) = sweep.sweep(run, self.clock.now()).await? {
                *invoice_slot = Some(invoice.clone());
                return self.resume_invoiced(run, &settings, ctx, invoice).await;
            }
        }

        let policy = settings.allocation_policy()?;
        self.ensure_recurring_instances(vendor_id, ctx.period).await?;

        let eligible = self
            .ports
            .units
            .load_eligible_units(vendor_id, ctx.period.end_date)
            .await?;
        if eligible.is_empty() {
            info!("Nothing to bill");
            return Ok(VendorAttempt::NothingToBill);
        }

        let allocation = CapAllocator::allocate(&policy, eligible)?;
        info!(
            mode = %policy.mode(),
            selected = allocation.selected.len(),
            total = %allocation.selected_total,
            "Units allocated"
        );
        if !allocation.deferred.is_empty() {
            info!(
                deferred = allocation.deferred.len(),
                carried_forward = %allocation.carried_forward_total,
                "Units carried forward past the cap"
            );
        }

        let selection = UnitSelection::from_units(&allocation.selected);
        self.ports
            .runs
            .record_selection(
                run.id,
                &selection,
                allocation.carried_forward(&policy),
                self.clock.now(),
            )
            .await?;
        self.claim(run, &selection).await?;

        let content = self.builder.build(ctx.period, &allocation, &policy);
        let draft = self.draft(run, &settings, ctx, &content);
        let invoice = match self.ports.invoices.create_invoice(&draft).await {
            Ok(invoice) => invoice,
            Err(error) => match self.ports.invoices.find_invoice_for_run(run.id).await {
                Ok(Some(invoice)) => {
                    warn!(
                        invoice_id = %invoice.id,
                        %error,
                        "Invoice creation reported an error but the invoice was stored; continuing"
                    );
                    invoice
                }
                _ => {
                    self.release_after_failure(run).await;
                    return Err(error.into());
                }
            },
        };
        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            total = %invoice.total,
            units = selection.len(),
            "Invoice created"
        );
        *invoice_slot = Some(invoice.clone());

        self.ports
            .runs
            .attach_invoice(run.id, invoice.id, self.clock.now())
            .await?;
        self.dispatch(run, &settings, ctx, &invoice, &content.notes.full)
            .await?;
        Ok(VendorAttempt::Sent(invoice))
    }

    async fn ensure_recurring_instances(
        &self,
        vendor_id: VendorId,
        period: &BillingPeriod,
    ) -> Result<(), BillingError> {
        let instances: Vec<_> = self
            .ports
            .vendors
            .active_recurring_charges(vendor_id)
            .await?
            .iter()
            .filter(|charge| charge.is_active)
            .map(|charge| charge.instantiate(period))
            .collect();
        if instances.is_empty() {
            return Ok(());
        }

        let created = self
            .ports
            .units
            .ensure_recurring_instances(&instances)
            .await?;
        if created > 0 {
            info!(created, "Recurring charge instances created");
        }
        Ok(())
    }

    async fn claim(&self, run: &BillingRun, selection: &UnitSelection) -> Result<(), BillingError> {
        let claimed = self.ports.units.claim_units(run.id, selection).await?;
        if claimed != selection.len() {
            self.release_after_failure(run).await;
            return Err(BillingError::ClaimConflict {
                expected: selection.len(),
                claimed,
            });
        }
        Ok(())
    }

    async fn release_after_failure(&self, run: &BillingRun) {
        match self.ports.units.release_units(run.id).await {
            Ok(released) => warn!(run_id = %run.id, released, "Released units after failed attempt"),
            Err(error) => error!(
                run_id = %run.id,
                %error,
                "Could not release units; the next run will sweep them"
            ),
        }
    }

    fn draft(
        &self,
        run: &BillingRun,
        settings: &VendorBillingSettings,
        ctx: &RunContext<'_>,
        content: &InvoiceContent,
    ) -> InvoiceDraft {
        let terms = settings
            .payment_terms_days
            .unwrap_or(self.config.payment_terms_days);
        InvoiceDraft {
            vendor_id: run.vendor_id,
            billing_run_id: run.id,
            period_key: run.period_key.clone(),
            invoice_date: ctx.invoice_date,
            due_date: ctx.invoice_date + Duration::days(i64::from(terms)),
            reference: format!("{} {}", self.config.reference_prefix, ctx.period.label()),
            line_items: content.line_items.clone(),
            notes: content.notes.printed().to_string(),
            internal_notes: content.notes.internal(run.id),
        }
    }

    /// Carries a run forward on the invoice it already produced
    async fn resume_invoiced(
        &self,
        run: &BillingRun,
        settings: &VendorBillingSettings,
        ctx: &RunContext<'_>,
        invoice: InvoiceRecord,
    ) -> Result<VendorAttempt, BillingError> {
        match ReconciliationCheck::decide(&invoice)? {
            ReconciliationAction::Reconcile(settled) => {
                ReconciliationCheck::reconcile(self.ports.units.as_ref(), run, &invoice, settled)
                    .await?;
                Ok(VendorAttempt::Reconciled(invoice))
            }
            ReconciliationAction::Redispatch => {
                info!(invoice_number = %invoice.invoice_number, "Re-sending draft invoice");
                let policy = match settings.allocation_policy() {
                    Ok(policy) => policy,
                    Err(error) => {
                        warn!(
                            invoice_number = %invoice.invoice_number,
                            %error,
                            "Cap settings are invalid; re-sent notes omit the carried-forward summary"
                        );
                        AllocationPolicy::Full
                    }
                };
                let selected = self.pending_or_relocked(run, &invoice).await?;
                let deferred = match policy {
                    AllocationPolicy::Full => Vec::new(),
                    AllocationPolicy::Cap { .. } => {
                        self.ports
                            .units
                            .load_eligible_units(run.vendor_id, ctx.period.end_date)
                            .await?
                    }
                };
                let allocation = Allocation::from_parts(selected, deferred);
                let notes = self.builder.notes(ctx.period, &allocation, &policy);
                self.dispatch(run, settings, ctx, &invoice, &notes.full).await?;
                Ok(VendorAttempt::Sent(invoice))
            }
        }
    }

    /// Units held by the run for a draft it is about to re-send
    ///
    /// A draft can exist while its units are back in `unbilled`: the store
    /// committed the invoice but the reply was lost and the attempt released
    /// its claim. The run's recorded selection is locked again before the
    /// draft goes out, so sending it also settles its units.
    async fn pending_or_relocked(
        &self,
        run: &BillingRun,
        invoice: &InvoiceRecord,
    ) -> Result<Vec<BillableUnit>, BillingError> {
        let pending = self.ports.units.pending_units(run.id).await?;
        if !pending.is_empty() {
            return Ok(pending);
        }

        let selection = run.selected_units.clone().unwrap_or_default();
        let claimed = if selection.is_empty() {
            0
        } else {
            self.ports.units.claim_units(run.id, &selection).await?
        };
        if selection.is_empty() || claimed != selection.len() {
            if claimed > 0 {
                self.release_after_failure(run).await;
            }
            return Err(BillingError::DraftUnitsUnavailable {
                invoice_number: invoice.invoice_number.clone(),
                expected: selection.len(),
                claimed,
            });
        }

        warn!(
            invoice_number = %invoice.invoice_number,
            relocked = claimed,
            "Draft invoice had released its units; locked them again"
        );
        Ok(self.ports.units.pending_units(run.id).await?)
    }

    async fn dispatch(
        &self,
        run: &BillingRun,
        settings: &VendorBillingSettings,
        ctx: &RunContext<'_>,
        invoice: &InvoiceRecord,
        full_notes: &str,
    ) -> Result<(), BillingError> {
        if !self.ports.mailer.is_configured() {
            return Err(BillingError::MissingPrerequisite(format!(
                "Email service is not configured; invoice {} kept as draft",
                invoice.invoice_number
            )));
        }

        let contacts = self.ports.vendors.contacts(run.vendor_id).await?;
        let recipients = Recipients::resolve(settings, &contacts)?;

        let attachment = if invoice.needs_timesheet_attachment() {
            let document = TimesheetDocument {
                invoice_number: invoice.invoice_number.clone(),
                vendor_name: settings.vendor_name.clone(),
                period_label: ctx.period.label(),
                body: full_notes.to_string(),
            };
            Some(self.ports.renderer.render(&document)?)
        } else {
            None
        };

        let email = InvoiceEmail::compose(
            invoice,
            &settings.vendor_name,
            ctx.period,
            recipients,
            &self.config.sender_name,
            attachment,
        );
        let receipt = self
            .ports
            .mailer
            .send(&email)
            .await
            .map_err(|error| BillingError::DispatchFailed {
                invoice_number: invoice.invoice_number.clone(),
                message: error.to_string(),
            })?;
        info!(
            invoice_number = %invoice.invoice_number,
            to = %email.recipients.to,
            cc = email.recipients.cc.len(),
            message_id = ?receipt.message_id,
            "Invoice sent"
        );

        self.ports
            .invoices
            .mark_invoice_sent(invoice.id, self.clock.now())
            .await?;
        self.ports
            .units
            .settle_units(run.id, invoice.id, SettledStatus::Billed)
            .await?;
        Ok(())
    }
}
