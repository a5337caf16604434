//! In-memory adapters for tests
//!
//! `InMemoryBillingStore` implements every storage port over maps guarded by
//! a `tokio` lock, with the same conditional-update semantics as the SQL
//! adapter. Failures can be injected at named points to exercise the
//! engine's recovery paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::RwLock;

use core_kernel::{
    BillingRunId, Clock, DomainPort, HealthCheckResult, HealthCheckable, InvoiceId,
    MileageEntryId, Money, PortError, RecurringChargeInstanceId, TimeEntryId, VendorId,
};

use crate::dispatch::{DeliveryReceipt, InvoiceEmail};
use crate::invoice::{InvoiceDraft, InvoiceLineItem, InvoiceRecord, InvoiceStatus};
use crate::ports::{BillableUnitPort, BillingRunPort, InvoiceMailer, InvoicePort, VendorDirectoryPort};
use crate::run::{BillingRun, NewBillingRun, ReclaimGuard, RunStatus};
use crate::settings::{VendorBillingSettings, VendorContact};
use crate::units::{
    BillableUnit, MileageEntry, NewRecurringChargeInstance, RecurringCharge,
    RecurringChargeInstance, SettledStatus, TimeEntry, UnitRef, UnitSelection, UnitStatus,
};

/// Where an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertRun,
    CandidateSelection,
    LoadUnits,
    /// Another run claims the first selected unit just before ours
    ClaimRace,
    CreateInvoice,
    /// The invoice is stored but the caller sees an error
    CreateInvoiceReplyLost,
    FindInvoiceForRun,
    AttachInvoice,
    MarkInvoiceSent,
    SettleUnits,
    FinishRun,
}

#[derive(Debug, Default)]
struct StoreState {
    runs: BTreeMap<BillingRunId, BillingRun>,
    time_entries: BTreeMap<TimeEntryId, TimeEntry>,
    mileage_entries: BTreeMap<MileageEntryId, MileageEntry>,
    recurring_charges: Vec<RecurringCharge>,
    recurring_instances: BTreeMap<RecurringChargeInstanceId, RecurringChargeInstance>,
    settings: HashMap<VendorId, VendorBillingSettings>,
    contacts: Vec<VendorContact>,
    invoices: BTreeMap<InvoiceId, InvoiceRecord>,
    invoice_lines: HashMap<InvoiceId, Vec<InvoiceLineItem>>,
    invoice_sequence: u32,
    /// Calls to let through before each armed point fails
    failures: HashMap<FailPoint, usize>,
}

impl StoreState {
    /// True when an armed failure fires on this call
    fn trips(&mut self, point: FailPoint) -> bool {
        let Some(skip) = self.failures.get_mut(&point) else {
            return false;
        };
        if *skip > 0 {
            *skip -= 1;
            return false;
        }
        self.failures.remove(&point);
        true
    }

    fn check(&mut self, point: FailPoint) -> Result<(), PortError> {
        if self.trips(point) {
            return Err(PortError::connection(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn units_mut(&mut self) -> impl Iterator<Item = &mut dyn StoredUnit> {
        self.recurring_instances
            .values_mut()
            .map(|u| u as &mut dyn StoredUnit)
            .chain(self.mileage_entries.values_mut().map(|u| u as &mut dyn StoredUnit))
            .chain(self.time_entries.values_mut().map(|u| u as &mut dyn StoredUnit))
    }

    fn units(&self) -> impl Iterator<Item = &dyn StoredUnit> {
        self.recurring_instances
            .values()
            .map(|u| u as &dyn StoredUnit)
            .chain(self.mileage_entries.values().map(|u| u as &dyn StoredUnit))
            .chain(self.time_entries.values().map(|u| u as &dyn StoredUnit))
    }

    fn unit_mut(&mut self, unit: &UnitRef) -> Option<&mut dyn StoredUnit> {
        match unit {
            UnitRef::RecurringCharge(id) => self
                .recurring_instances
                .get_mut(id)
                .map(|u| u as &mut dyn StoredUnit),
            UnitRef::Mileage(id) => self.mileage_entries.get_mut(id).map(|u| u as &mut dyn StoredUnit),
            UnitRef::Time(id) => self.time_entries.get_mut(id).map(|u| u as &mut dyn StoredUnit),
        }
    }
}

/// Uniform access to the three unit tables
trait StoredUnit: Send + Sync {
    fn to_unit(&self) -> BillableUnit;
    fn due_by(&self, through: NaiveDate) -> bool;
    fn lock_state(&mut self) -> (&mut UnitStatus, &mut Option<BillingRunId>, &mut Option<InvoiceId>);
}

macro_rules! stored_unit {
    ($ty:ty, $variant:ident, $date:ident) => {
        impl StoredUnit for $ty {
            fn to_unit(&self) -> BillableUnit {
                BillableUnit::$variant(self.clone())
            }

            fn due_by(&self, through: NaiveDate) -> bool {
                self.$date <= through
            }

            fn lock_state(
                &mut self,
            ) -> (&mut UnitStatus, &mut Option<BillingRunId>, &mut Option<InvoiceId>) {
                (&mut self.status, &mut self.billing_run_id, &mut self.invoice_id)
            }
        }
    };
}

stored_unit!(TimeEntry, Time, entry_date);
stored_unit!(MileageEntry, Mileage, entry_date);
stored_unit!(RecurringChargeInstance, RecurringCharge, period_end);

/// In-memory implementation of every billing storage port
#[derive(Debug, Default)]
pub struct InMemoryBillingStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a one-shot failure
    pub async fn fail_once(&self, point: FailPoint) {
        self.fail_after(point, 0).await;
    }

    /// Arms a one-shot failure that lets `skip` calls through first
    pub async fn fail_after(&self, point: FailPoint, skip: usize) {
        self.state.write().await.failures.insert(point, skip);
    }

    pub async fn add_time_entry(&self, entry: TimeEntry) {
        self.state.write().await.time_entries.insert(entry.id, entry);
    }

    pub async fn add_mileage_entry(&self, entry: MileageEntry) {
        self.state.write().await.mileage_entries.insert(entry.id, entry);
    }

    pub async fn add_recurring_charge(&self, charge: RecurringCharge) {
        self.state.write().await.recurring_charges.push(charge);
    }

    pub async fn set_settings(&self, settings: VendorBillingSettings) {
        self.state
            .write()
            .await
            .settings
            .insert(settings.vendor_id, settings);
    }

    pub async fn add_contact(&self, contact: VendorContact) {
        self.state.write().await.contacts.push(contact);
    }

    pub async fn insert_run(&self, run: BillingRun) {
        self.state.write().await.runs.insert(run.id, run);
    }

    /// Moves a run's heartbeat, e.g. to make it stale
    pub async fn set_run_updated_at(&self, run_id: BillingRunId, updated_at: DateTime<Utc>) {
        if let Some(run) = self.state.write().await.runs.get_mut(&run_id) {
            run.updated_at = updated_at;
        }
    }

    pub async fn set_invoice_status(&self, invoice_id: InvoiceId, status: InvoiceStatus) {
        if let Some(invoice) = self.state.write().await.invoices.get_mut(&invoice_id) {
            invoice.status = status;
        }
    }

    pub async fn runs(&self) -> Vec<BillingRun> {
        self.state.read().await.runs.values().cloned().collect()
    }

    pub async fn run_for(&self, vendor_id: VendorId, period_key: &str) -> Option<BillingRun> {
        self.state
            .read()
            .await
            .runs
            .values()
            .find(|r| r.vendor_id == vendor_id && r.period_key == period_key)
            .cloned()
    }

    pub async fn invoices(&self) -> Vec<InvoiceRecord> {
        self.state.read().await.invoices.values().cloned().collect()
    }

    pub async fn invoice_lines(&self, invoice_id: InvoiceId) -> Vec<InvoiceLineItem> {
        self.state
            .read()
            .await
            .invoice_lines
            .get(&invoice_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every unit in every state
    pub async fn all_units(&self) -> Vec<BillableUnit> {
        self.state.read().await.units().map(StoredUnit::to_unit).collect()
    }

    pub async fn unit(&self, unit: UnitRef) -> Option<BillableUnit> {
        self.all_units()
            .await
            .into_iter()
            .find(|u| u.unit_ref() == unit)
    }
}

impl DomainPort for InMemoryBillingStore {}

#[async_trait]
impl HealthCheckable for InMemoryBillingStore {
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult::healthy("in-memory-billing-store", 0)
    }
}

#[async_trait]
impl BillingRunPort for InMemoryBillingStore {
    async fn insert_processing_run(&self, run: &NewBillingRun) -> Result<BillingRun, PortError> {
        let mut state = self.state.write().await;
        state.check(FailPoint::InsertRun)?;
        if state
            .runs
            .values()
            .any(|r| r.vendor_id == run.vendor_id && r.period_key == run.period_key)
        {
            return Err(PortError::conflict(format!(
                "billing run for {} {} already exists",
                run.vendor_id, run.period_key
            )));
        }

        let created = BillingRun {
            id: run.id,
            vendor_id: run.vendor_id,
            period_key: run.period_key.clone(),
            status: RunStatus::Processing,
            invoice_id: None,
            selected_units: None,
            carried_forward_amount: None,
            error_message: None,
            attempts: 1,
            created_at: run.started_at,
            updated_at: run.started_at,
            finished_at: None,
        };
        state.runs.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_run(
        &self,
        vendor_id: VendorId,
        period_key: &str,
    ) -> Result<Option<BillingRun>, PortError> {
        Ok(self.run_for(vendor_id, period_key).await)
    }

    async fn reclaim_run(
        &self,
        guard: &ReclaimGuard,
        now: DateTime<Utc>,
    ) -> Result<Option<BillingRun>, PortError> {
        let mut state = self.state.write().await;
        let Some(run) = state.runs.get_mut(&guard.run_id) else {
            return Ok(None);
        };
        if run.status != guard.expected_status
            || run.updated_at != guard.expected_updated_at
            || run.status == RunStatus::Sent
        {
            return Ok(None);
        }

        run.status = RunStatus::Processing;
        run.error_message = None;
        run.attempts += 1;
        run.updated_at = now;
        run.finished_at = None;
        Ok(Some(run.clone()))
    }

    async fn record_selection(
        &self,
        run_id: BillingRunId,
        selection: &UnitSelection,
        carried_forward_amount: Option<Money>,
        now: DateTime<Utc>,
    ) -> Result<(), PortError> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| PortError::not_found("BillingRun", run_id))?;
        run.selected_units = Some(selection.clone());
        run.carried_forward_amount = carried_forward_amount;
        run.updated_at = now;
        Ok(())
    }

    async fn attach_invoice(
        &self,
        run_id: BillingRunId,
        invoice_id: InvoiceId,
        now: DateTime<Utc>,
    ) -> Result<(), PortError> {
        let mut state = self.state.write().await;
        state.check(FailPoint::AttachInvoice)?;
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| PortError::not_found("BillingRun", run_id))?;
        run.invoice_id = Some(invoice_id);
        run.updated_at = now;
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: BillingRunId,
        status: RunStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, PortError> {
        let mut state = self.state.write().await;
        state.check(FailPoint::FinishRun)?;
        match state.runs.get_mut(&run_id) {
            Some(run) if run.status == RunStatus::Processing => {
                run.status = status;
                run.error_message = error_message.map(str::to_string);
                run.updated_at = now;
                run.finished_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn discard_run(&self, run_id: BillingRunId) -> Result<bool, PortError> {
        let mut state = self.state.write().await;
        let discardable = state
            .runs
            .get(&run_id)
            .map(|r| r.status == RunStatus::Processing && r.invoice_id.is_none())
            .unwrap_or(false);
        if discardable {
            state.runs.remove(&run_id);
        }
        Ok(discardable)
    }

    async fn record_failed_attempt(
        &self,
        vendor_id: VendorId,
        period_key: &str,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PortError> {
        let mut state = self.state.write().await;
        let existing = state
            .runs
            .values_mut()
            .find(|r| r.vendor_id == vendor_id && r.period_key == period_key);

        match existing {
            Some(run) if run.status == RunStatus::Failed => {
                run.error_message = Some(error_message.to_string());
                run.updated_at = now;
            }
            Some(_) => {}
            None => {
                let run = BillingRun {
                    id: BillingRunId::new(),
                    vendor_id,
                    period_key: period_key.to_string(),
                    status: RunStatus::Failed,
                    invoice_id: None,
                    selected_units: None,
                    carried_forward_amount: None,
                    error_message: Some(error_message.to_string()),
                    attempts: 1,
                    created_at: now,
                    updated_at: now,
                    finished_at: Some(now),
                };
                state.runs.insert(run.id, run);
            }
        }
        Ok(())
    }

    async fn vendors_with_failed_runs(&self, period_key: &str) -> Result<Vec<VendorId>, PortError> {
        Ok(self
            .state
            .read()
            .await
            .runs
            .values()
            .filter(|r| r.period_key == period_key && r.status == RunStatus::Failed)
            .map(|r| r.vendor_id)
            .collect())
    }

    async fn vendors_with_stale_runs(
        &self,
        period_key: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<VendorId>, PortError> {
        Ok(self
            .state
            .read()
            .await
            .runs
            .values()
            .filter(|r| {
                r.period_key == period_key
                    && r.status == RunStatus::Processing
                    && r.updated_at < stale_before
            })
            .map(|r| r.vendor_id)
            .collect())
    }
}

#[async_trait]
impl BillableUnitPort for InMemoryBillingStore {
    async fn vendors_with_unbilled_entries(&self, through: NaiveDate) -> Result<Vec<VendorId>, PortError> {
        let mut state = self.state.write().await;
        state.check(FailPoint::CandidateSelection)?;
        let time = state
            .time_entries
            .values()
            .filter(|e| e.status == UnitStatus::Unbilled && e.entry_date <= through)
            .map(|e| e.vendor_id);
        let mileage = state
            .mileage_entries
            .values()
            .filter(|e| e.status == UnitStatus::Unbilled && e.entry_date <= through)
            .map(|e| e.vendor_id);
        Ok(time.chain(mileage).collect())
    }

    async fn vendors_with_active_recurring_charges(&self) -> Result<Vec<VendorId>, PortError> {
        Ok(self
            .state
            .read()
            .await
            .recurring_charges
            .iter()
            .filter(|c| c.is_active)
            .map(|c| c.vendor_id)
            .collect())
    }

    async fn vendors_with_unbilled_recurring_instances(
        &self,
        through: NaiveDate,
    ) -> Result<Vec<VendorId>, PortError> {
        Ok(self
            .state
            .read()
            .await
            .recurring_instances
            .values()
            .filter(|i| i.status == UnitStatus::Unbilled && i.period_end <= through)
            .map(|i| i.vendor_id)
            .collect())
    }

    async fn ensure_recurring_instances(
        &self,
        instances: &[NewRecurringChargeInstance],
    ) -> Result<usize, PortError> {
        let mut state = self.state.write().await;
        let mut created = 0;
        for new in instances {
            let exists = state.recurring_instances.values().any(|i| {
                i.vendor_id == new.vendor_id
                    && i.recurring_charge_id == new.recurring_charge_id
                    && i.period_key == new.period_key
            });
            if exists {
                continue;
            }
            let instance = RecurringChargeInstance {
                id: RecurringChargeInstanceId::new(),
                vendor_id: new.vendor_id,
                recurring_charge_id: new.recurring_charge_id,
                period_key: new.period_key.clone(),
                period_start: new.period_start,
                period_end: new.period_end,
                description: new.description.clone(),
                amount_ex_vat: new.amount_ex_vat,
                vat_rate: new.vat_rate,
                sort_order: new.sort_order,
                status: UnitStatus::Unbilled,
                billing_run_id: None,
                invoice_id: None,
                created_at: Utc::now(),
            };
            state.recurring_instances.insert(instance.id, instance);
            created += 1;
        }
        Ok(created)
    }

    async fn load_eligible_units(
        &self,
        vendor_id: VendorId,
        through: NaiveDate,
    ) -> Result<Vec<BillableUnit>, PortError> {
        let mut state = self.state.write().await;
        state.check(FailPoint::LoadUnits)?;
        Ok(state
            .units()
            .filter(|u| u.due_by(through))
            .map(StoredUnit::to_unit)
            .filter(|u| u.vendor_id() == vendor_id && u.status() == UnitStatus::Unbilled)
            .collect())
    }

    async fn claim_units(
        &self,
        run_id: BillingRunId,
        selection: &UnitSelection,
    ) -> Result<usize, PortError> {
        let mut state = self.state.write().await;
        if state.trips(FailPoint::ClaimRace) {
            if let Some(first) = selection.refs().next() {
                if let Some(unit) = state.unit_mut(&first) {
                    let (status, tag, _) = unit.lock_state();
                    *status = UnitStatus::BillingPending;
                    *tag = Some(BillingRunId::new());
                }
            }
        }

        let mut claimed = 0;
        for unit_ref in selection.refs() {
            let Some(unit) = state.unit_mut(&unit_ref) else {
                continue;
            };
            let (status, tag, _) = unit.lock_state();
            if let Ok(next) = status.claim() {
                *status = next;
                *tag = Some(run_id);
                claimed += 1;
            }
        }
        Ok(claimed)
    }

    async fn release_units(&self, run_id: BillingRunId) -> Result<usize, PortError> {
        let mut state = self.state.write().await;
        let mut released = 0;
        for unit in state.units_mut() {
            let (status, tag, _) = unit.lock_state();
            if *tag != Some(run_id) {
                continue;
            }
            if let Ok(next) = status.release() {
                *status = next;
                *tag = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn pending_units(&self, run_id: BillingRunId) -> Result<Vec<BillableUnit>, PortError> {
        Ok(self
            .state
            .read()
            .await
            .units()
            .map(StoredUnit::to_unit)
            .filter(|u| u.billing_run_id() == Some(run_id) && u.status() == UnitStatus::BillingPending)
            .collect())
    }

    async fn settle_units(
        &self,
        run_id: BillingRunId,
        invoice_id: InvoiceId,
        target: SettledStatus,
    ) -> Result<usize, PortError> {
        let mut state = self.state.write().await;
        state.check(FailPoint::SettleUnits)?;
        let mut settled = 0;
        for unit in state.units_mut() {
            let (status, tag, invoice) = unit.lock_state();
            if *tag != Some(run_id) {
                continue;
            }
            if *status == target.as_unit_status() {
                *invoice = Some(invoice_id);
                settled += 1;
            } else if let Ok(next) = status.finalize(target) {
                *status = next;
                *invoice = Some(invoice_id);
                settled += 1;
            }
        }
        Ok(settled)
    }
}

#[async_trait]
impl InvoicePort for InMemoryBillingStore {
    async fn create_invoice(&self, draft: &InvoiceDraft) -> Result<InvoiceRecord, PortError> {
        let mut state = self.state.write().await;
        state.check(FailPoint::CreateInvoice)?;
        let reply_lost = state.trips(FailPoint::CreateInvoiceReplyLost);
        state.invoice_sequence += 1;
        let now = Utc::now();
        let invoice = InvoiceRecord {
            id: InvoiceId::new(),
            invoice_number: format!("INV-{:04}", state.invoice_sequence),
            vendor_id: draft.vendor_id,
            billing_run_id: Some(draft.billing_run_id),
            status: InvoiceStatus::Draft,
            invoice_date: draft.invoice_date,
            due_date: draft.due_date,
            reference: draft.reference.clone(),
            subtotal: draft.subtotal(),
            vat_total: draft.vat_total(),
            total: draft.total(),
            notes: draft.notes.clone(),
            internal_notes: draft.internal_notes.clone(),
            created_at: now,
            updated_at: now,
        };
        state
            .invoice_lines
            .insert(invoice.id, draft.line_items.clone());
        state.invoices.insert(invoice.id, invoice.clone());
        if reply_lost {
            return Err(PortError::connection("connection reset after commit"));
        }
        Ok(invoice)
    }

    async fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Option<InvoiceRecord>, PortError> {
        Ok(self.state.read().await.invoices.get(&invoice_id).cloned())
    }

    async fn find_invoice_for_run(&self, run_id: BillingRunId) -> Result<Option<InvoiceRecord>, PortError> {
        let mut state = self.state.write().await;
        state.check(FailPoint::FindInvoiceForRun)?;
        Ok(state
            .invoices
            .values()
            .find(|i| i.billing_run_id == Some(run_id))
            .cloned())
    }

    async fn mark_invoice_sent(&self, invoice_id: InvoiceId, now: DateTime<Utc>) -> Result<(), PortError> {
        let mut state = self.state.write().await;
        state.check(FailPoint::MarkInvoiceSent)?;
        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| PortError::not_found("Invoice", invoice_id))?;
        if invoice.status == InvoiceStatus::Draft {
            invoice.status = InvoiceStatus::Sent;
            invoice.updated_at = now;
        }
        Ok(())
    }
}

#[async_trait]
impl VendorDirectoryPort for InMemoryBillingStore {
    async fn billing_settings(&self, vendor_id: VendorId) -> Result<Option<VendorBillingSettings>, PortError> {
        Ok(self.state.read().await.settings.get(&vendor_id).cloned())
    }

    async fn contacts(&self, vendor_id: VendorId) -> Result<Vec<VendorContact>, PortError> {
        Ok(self
            .state
            .read()
            .await
            .contacts
            .iter()
            .filter(|c| c.vendor_id == vendor_id)
            .cloned()
            .collect())
    }

    async fn active_recurring_charges(&self, vendor_id: VendorId) -> Result<Vec<RecurringCharge>, PortError> {
        Ok(self
            .state
            .read()
            .await
            .recurring_charges
            .iter()
            .filter(|c| c.vendor_id == vendor_id && c.is_active)
            .cloned()
            .collect())
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Mutex::new(at))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Mailer that records what it would have sent
#[derive(Debug)]
pub struct RecordingMailer {
    configured: AtomicBool,
    fail_next: RwLock<Option<String>>,
    sent: RwLock<Vec<InvoiceEmail>>,
    /// Each send moves this clock on, like a slow SMTP exchange
    send_latency: Option<(Arc<ManualClock>, Duration)>,
}

impl Default for RecordingMailer {
    fn default() -> Self {
        Self {
            configured: AtomicBool::new(true),
            fail_next: RwLock::new(None),
            sent: RwLock::new(Vec::new()),
            send_latency: None,
        }
    }
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer with no credentials
    pub fn unconfigured() -> Self {
        let mailer = Self::default();
        mailer.set_configured(false);
        mailer
    }

    /// A mailer whose every send takes `latency` on `clock`
    pub fn slow(clock: Arc<ManualClock>, latency: Duration) -> Self {
        Self {
            send_latency: Some((clock, latency)),
            ..Self::default()
        }
    }

    pub fn set_configured(&self, configured: bool) {
        self.configured.store(configured, Ordering::SeqCst);
    }

    /// Makes the next send fail with `message`
    pub async fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.write().await = Some(message.into());
    }

    pub async fn sent(&self) -> Vec<InvoiceEmail> {
        self.sent.read().await.clone()
    }
}

impl DomainPort for RecordingMailer {}

#[async_trait]
impl InvoiceMailer for RecordingMailer {
    fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    async fn send(&self, email: &InvoiceEmail) -> Result<DeliveryReceipt, PortError> {
        if let Some((clock, latency)) = &self.send_latency {
            clock.advance(*latency);
        }
        if let Some(message) = self.fail_next.write().await.take() {
            return Err(PortError::rejected("mailer", message));
        }
        let mut sent = self.sent.write().await;
        sent.push(email.clone());
        Ok(DeliveryReceipt {
            message_id: Some(format!("recorded-{}", sent.len())),
        })
    }
}
