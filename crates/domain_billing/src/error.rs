//! Billing domain errors

use serde::Serialize;
use thiserror::Error;

use core_kernel::{CoreError, Money, PortError, TemporalError};

/// Errors that can occur while billing a vendor
#[derive(Debug, Error)]
pub enum BillingError {
    /// Data store or collaborator call failed
    #[error("{0}")]
    Port(#[from] PortError),

    /// A domain invariant was violated
    #[error("{0}")]
    Core(#[from] CoreError),

    /// Period resolution failed
    #[error("Billing period error: {0}")]
    Temporal(#[from] TemporalError),

    /// Eligible work exists but no single unit fits within the cap
    #[error(
        "Nothing fits within the monthly cap of {cap} inc VAT: {eligible_units} eligible item(s), \
         the smallest costs {smallest_unit} inc VAT. Raise the cap or switch the vendor to full billing"
    )]
    CapTooLow {
        cap: Money,
        eligible_units: usize,
        smallest_unit: Money,
    },

    /// Configuration or recipient data needed to send is missing
    #[error("{0}")]
    MissingPrerequisite(String),

    /// The invoice exists but could not be delivered
    #[error("Invoice {invoice_number} was created but sending failed: {message}")]
    DispatchFailed {
        invoice_number: String,
        message: String,
    },

    /// The run's invoice was voided outside the engine
    #[error("Invoice {invoice_number} for this run was voided; review the run before re-billing")]
    InvoiceVoided { invoice_number: String },

    /// A draft invoice was found whose units are no longer locked by the run
    /// and could not all be re-locked
    #[error(
        "Draft invoice {invoice_number} no longer holds its units: re-locked {claimed} of {expected}. \
         Review or void the draft before re-billing"
    )]
    DraftUnitsUnavailable {
        invoice_number: String,
        expected: usize,
        claimed: usize,
    },

    /// Another writer claimed some of the selected units first
    #[error("Claimed {claimed} of {expected} selected units; another run changed them concurrently")]
    ClaimConflict { expected: usize, claimed: usize },
}

/// Failure taxonomy reported for a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Data-store or transport error; retried next invocation
    Infrastructure,
    /// Business rule prevents invoicing (nothing fits the cap)
    Policy,
    /// Missing configuration or recipients; invoice kept in draft
    Prerequisite,
    /// Invoice created, delivery failed; invoice kept, units kept pending
    PartialSuccess,
}

impl BillingError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BillingError::Port(PortError::Unavailable { .. }) => FailureKind::Prerequisite,
            BillingError::Port(_)
            | BillingError::Core(_)
            | BillingError::Temporal(_)
            | BillingError::ClaimConflict { .. } => FailureKind::Infrastructure,
            BillingError::CapTooLow { .. }
            | BillingError::InvoiceVoided { .. }
            | BillingError::DraftUnitsUnavailable { .. } => FailureKind::Policy,
            BillingError::MissingPrerequisite(_) => FailureKind::Prerequisite,
            BillingError::DispatchFailed { .. } => FailureKind::PartialSuccess,
        }
    }
}
