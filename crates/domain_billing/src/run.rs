//! Billing run records
//!
//! One `BillingRun` row exists per `(vendor_id, period_key)`. It is the only
//! source of truth for whether a vendor has been billed for a period.
//!
//! ```text
//!              ┌───────────── reclaim (stale) ─────────────┐
//!              ▼                                            │
//! insert ─▶ Processing ──resolve──▶ Sent (terminal)         │
//!              │    ▲                                       │
//!              │    └──── reclaim (retry) ──── Failed ◀─────┘
//!              └─────────resolve─────────────▶ Failed
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{BillingRunId, CoreError, InvoiceId, Money, VendorId};

use crate::error::FailureKind;
use crate::units::UnitSelection;

/// Liveness window after which a `processing` run is presumed crashed
pub const DEFAULT_LIVENESS_WINDOW_MINUTES: i64 = 30;

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Processing,
    Sent,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Processing => "processing",
            RunStatus::Sent => "sent",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Processing)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(RunStatus::Processing),
            "sent" => Ok(RunStatus::Sent),
            "failed" => Ok(RunStatus::Failed),
            other => Err(CoreError::unknown("run status", other)),
        }
    }
}

/// A billing run row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRun {
    pub id: BillingRunId,
    pub vendor_id: VendorId,
    pub period_key: String,
    pub status: RunStatus,
    pub invoice_id: Option<InvoiceId>,
    /// Ids locked by the current attempt
    pub selected_units: Option<UnitSelection>,
    /// Cap mode only: VAT-inclusive value deferred to later periods
    pub carried_forward_amount: Option<Money>,
    pub error_message: Option<String>,
    /// Number of times this row has been (re)started
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    /// Bumped by every write; liveness is measured from here
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What to do when a run row already exists for the vendor/period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingRunDecision {
    /// Terminal: the period is billed
    AlreadySent,
    /// Another invocation owns the row and is still inside its window
    InFlight,
    /// Take the row over
    Reclaim(AcquireOrigin),
}

/// How a run came to be owned by the current invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireOrigin {
    Fresh,
    RetryAfterFailure,
    ReclaimedStale,
}

impl BillingRun {
    pub fn is_stale(&self, now: DateTime<Utc>, liveness_window: Duration) -> bool {
        self.status == RunStatus::Processing && now - self.updated_at > liveness_window
    }

    pub fn decide(&self, now: DateTime<Utc>, liveness_window: Duration) -> ExistingRunDecision {
        match self.status {
            RunStatus::Sent => ExistingRunDecision::AlreadySent,
            RunStatus::Failed => ExistingRunDecision::Reclaim(AcquireOrigin::RetryAfterFailure),
            RunStatus::Processing if self.is_stale(now, liveness_window) => {
                ExistingRunDecision::Reclaim(AcquireOrigin::ReclaimedStale)
            }
            RunStatus::Processing => ExistingRunDecision::InFlight,
        }
    }

    /// Optimistic guard for taking this row over
    pub fn reclaim_guard(&self) -> ReclaimGuard {
        ReclaimGuard {
            run_id: self.id,
            expected_status: self.status,
            expected_updated_at: self.updated_at,
        }
    }
}

/// Conditional-update guard: the row must still look exactly as observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimGuard {
    pub run_id: BillingRunId,
    pub expected_status: RunStatus,
    pub expected_updated_at: DateTime<Utc>,
}

/// Insert payload for a fresh `processing` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBillingRun {
    pub id: BillingRunId,
    pub vendor_id: VendorId,
    pub period_key: String,
    pub started_at: DateTime<Utc>,
}

impl NewBillingRun {
    pub fn new(vendor_id: VendorId, period_key: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: BillingRunId::new(),
            vendor_id,
            period_key: period_key.into(),
            started_at,
        }
    }
}

/// The single terminal write for an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResolution {
    Sent,
    Failed { message: String, kind: FailureKind },
    /// Nothing was billable; the row is removed so later work can bill
    Discard,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: RunStatus, updated_at: DateTime<Utc>) -> BillingRun {
        BillingRun {
            id: BillingRunId::new(),
            vendor_id: VendorId::new(),
            period_key: "2026-09".to_string(),
            status,
            invoice_id: None,
            selected_units: None,
            carried_forward_amount: None,
            error_message: None,
            attempts: 1,
            created_at: updated_at,
            updated_at,
            finished_at: None,
        }
    }

    #[test]
    fn test_sent_is_terminal_idempotent() {
        let now = Utc::now();
        let existing = run(RunStatus::Sent, now - Duration::days(3));
        assert_eq!(
            existing.decide(now, Duration::minutes(30)),
            ExistingRunDecision::AlreadySent
        );
    }

    #[test]
    fn test_fresh_processing_is_in_flight() {
        let now = Utc::now();
        let existing = run(RunStatus::Processing, now - Duration::minutes(5));
        assert_eq!(existing.decide(now, Duration::minutes(30)), ExistingRunDecision::InFlight);
    }

    #[test]
    fn test_stale_processing_is_reclaimed() {
        let now = Utc::now();
        let existing = run(RunStatus::Processing, now - Duration::minutes(31));
        assert!(existing.is_stale(now, Duration::minutes(30)));
        assert_eq!(
            existing.decide(now, Duration::minutes(30)),
            ExistingRunDecision::Reclaim(AcquireOrigin::ReclaimedStale)
        );
    }

    #[test]
    fn test_failed_is_retried() {
        let now = Utc::now();
        let existing = run(RunStatus::Failed, now - Duration::minutes(1));
        assert_eq!(
            existing.decide(now, Duration::minutes(30)),
            ExistingRunDecision::Reclaim(AcquireOrigin::RetryAfterFailure)
        );
    }

    #[test]
    fn test_status_round_trip() {
        for status in [RunStatus::Processing, RunStatus::Sent, RunStatus::Failed] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!(RunStatus::Sent.is_terminal());
        assert!(!RunStatus::Processing.is_terminal());
    }
}
