//! Core Kernel - Foundational types for the recurring billing engine
//!
//! This crate provides the building blocks shared by every other crate:
//! - Money and VAT types with precise decimal arithmetic and penny rounding
//! - Calendar ranges, the business time zone and clocks
//! - Strongly-typed identifiers
//! - Port infrastructure for the ports-and-adapters layout

pub mod money;
pub mod temporal;
pub mod clock;
pub mod identifiers;
pub mod ports;
pub mod error;

pub use money::{Money, MoneyError, VatRate, round_pence};
pub use temporal::{DateRange, Timezone, TemporalError};
pub use clock::{Clock, FixedClock, SystemClock};
pub use identifiers::{
    VendorId, ContactId, ProjectId,
    TimeEntryId, MileageEntryId, RecurringChargeId, RecurringChargeInstanceId,
    BillingRunId, InvoiceId, InvoiceLineItemId,
};
pub use ports::{
    PortError, DomainPort, AdapterHealth, HealthCheckable, HealthCheckResult,
};
pub use error::CoreError;
