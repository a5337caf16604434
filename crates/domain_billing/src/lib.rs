//! Billing Domain - Recurring Billing Run Engine
//!
//! This crate bills vendors once a month for the work logged against them:
//! time entries, mileage entries and recurring charges. A run may be
//! triggered any number of times for the same month and must still produce
//! at most one invoice per vendor.
//!
//! # Pipeline
//!
//! For each candidate vendor:
//!
//! 1. **Run ledger** - take ownership of the `(vendor, period)` run, or skip
//! 2. **Recovery sweep** - release units a crashed attempt left locked
//! 3. **Reconciliation check** - finish a run whose invoice already exists
//! 4. **Allocation** - pick units, honouring a VAT-inclusive monthly cap
//! 5. **Line items** - aggregate units into auditable invoice lines
//! 6. **Persistence and dispatch** - create the invoice and email it
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingPorts, BillingRunEngine, EngineConfig, TriggerOptions};
//!
//! let engine = BillingRunEngine::new(ports, EngineConfig::default());
//! let outcome = engine.run(Utc::now(), TriggerOptions { force: false }).await?;
//! ```

pub mod period;
pub mod units;
pub mod settings;
pub mod run;
pub mod ledger;
pub mod allocation;
pub mod line_items;
pub mod invoice;
pub mod dispatch;
pub mod recovery;
pub mod ports;
pub mod engine;
pub mod error;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use period::BillingPeriod;
pub use units::{
    BillableUnit, MileageEntry, NewRecurringChargeInstance, RecurringCharge,
    RecurringChargeInstance, SettledStatus, TimeEntry, UnitKind, UnitPrice, UnitRef,
    UnitSelection, UnitStatus,
};
pub use settings::{AllocationPolicy, BillingMode, VendorBillingSettings, VendorContact};
pub use run::{AcquireOrigin, BillingRun, RunResolution, RunStatus};
pub use ledger::{Acquisition, RunLedger};
pub use allocation::{Allocation, CapAllocator};
pub use line_items::{InvoiceContent, InvoiceNotes, LineItemBuilder};
pub use invoice::{InvoiceDraft, InvoiceLineItem, InvoiceRecord, InvoiceStatus};
pub use dispatch::{
    Attachment, DeliveryReceipt, InvoiceEmail, PlainTextTimesheetRenderer, Recipients,
    TimesheetDocument,
};
pub use recovery::{ReconciliationAction, ReconciliationCheck, RecoverySweep, ResumeState};
pub use ports::{
    BillableUnitPort, BillingRunPort, InvoiceMailer, InvoicePort, TimesheetRenderer,
    VendorDirectoryPort,
};
pub use engine::{
    BillingPorts, BillingRunEngine, BillingRunOutcome, BillingRunSummary, EngineConfig,
    NotScheduled, TriggerOptions, VendorResult, VendorRunStatus,
};
pub use error::{BillingError, FailureKind};
#[cfg(any(test, feature = "mock"))]
pub use mock::{FailPoint, InMemoryBillingStore, ManualClock, RecordingMailer};
