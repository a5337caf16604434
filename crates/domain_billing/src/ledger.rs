//! Run ledger
//!
//! Per-vendor, per-period idempotency. `acquire` decides whether this
//! invocation owns the vendor's run; `resolve` writes the single terminal
//! state for an owned run. All exclusion comes from the store's unique key
//! and conditional updates; nothing here is locked in process.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use core_kernel::{PortError, VendorId};

use crate::error::BillingError;
use crate::ports::BillingRunPort;
use crate::run::{
    AcquireOrigin, BillingRun, ExistingRunDecision, NewBillingRun, RunResolution, RunStatus,
    DEFAULT_LIVENESS_WINDOW_MINUTES,
};

/// Upper bound on read/decide/reclaim rounds before giving up
const MAX_ACQUIRE_ROUNDS: usize = 5;

/// Outcome of trying to take a vendor's run for a period
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// This invocation owns the run
    Acquired { run: BillingRun, origin: AcquireOrigin },
    /// The period is already billed
    AlreadySent(BillingRun),
    /// Another invocation owns the run
    InFlight(BillingRun),
}

/// Acquire/resolve over a [`BillingRunPort`]
pub struct RunLedger {
    runs: Arc<dyn BillingRunPort>,
    liveness_window: Duration,
}

impl RunLedger {
    pub fn new(runs: Arc<dyn BillingRunPort>) -> Self {
        Self {
            runs,
            liveness_window: Duration::minutes(DEFAULT_LIVENESS_WINDOW_MINUTES),
        }
    }

    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    /// Takes ownership of the vendor's run for `period_key`, if allowed
    pub async fn acquire(
        &self,
        vendor_id: VendorId,
        period_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Acquisition, BillingError> {
        let mut last_seen: Option<BillingRun> = None;

        for round in 0..MAX_ACQUIRE_ROUNDS {
            if let Some(run) = self.try_insert(vendor_id, period_key, now).await? {
                info!(%vendor_id, period_key, run_id = %run.id, "Billing run started");
                return Ok(Acquisition::Acquired {
                    run,
                    origin: AcquireOrigin::Fresh,
                });
            }

            let Some(existing) = self.runs.find_run(vendor_id, period_key).await? else {
                // Deleted between our insert and read; insert again
                debug!(%vendor_id, period_key, round, "Run row vanished, retrying insert");
                continue;
            };

            match existing.decide(now, self.liveness_window) {
                ExistingRunDecision::AlreadySent => {
                    debug!(%vendor_id, period_key, "Run already sent");
                    return Ok(Acquisition::AlreadySent(existing));
                }
                ExistingRunDecision::InFlight => {
                    warn!(
                        %vendor_id,
                        period_key,
                        run_id = %existing.id,
                        "Run is being processed by another invocation"
                    );
                    return Ok(Acquisition::InFlight(existing));
                }
                ExistingRunDecision::Reclaim(origin) => {
                    let guard = existing.reclaim_guard();
                    if let Some(run) = self.runs.reclaim_run(&guard, now).await? {
                        warn!(
                            %vendor_id,
                            period_key,
                            run_id = %run.id,
                            previous_status = %existing.status,
                            attempts = run.attempts,
                            "Billing run reclaimed"
                        );
                        return Ok(Acquisition::Acquired { run, origin });
                    }
                    debug!(%vendor_id, period_key, round, "Lost reclaim race, re-reading run");
                    last_seen = Some(existing);
                }
            }
        }

        match last_seen {
            Some(run) => Ok(Acquisition::InFlight(run)),
            None => Err(PortError::conflict(format!(
                "could not acquire billing run for {} {} after {} attempts",
                vendor_id, period_key, MAX_ACQUIRE_ROUNDS
            ))
            .into()),
        }
    }

    async fn try_insert(
        &self,
        vendor_id: VendorId,
        period_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BillingRun>, BillingError> {
        let new_run = NewBillingRun::new(vendor_id, period_key, now);
        match self.runs.insert_processing_run(&new_run).await {
            Ok(run) => Ok(Some(run)),
            Err(error) if error.is_conflict() => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Writes the terminal state for an owned run
    pub async fn resolve(
        &self,
        run: &BillingRun,
        resolution: RunResolution,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        let applied = match &resolution {
            RunResolution::Sent => {
                self.runs.finish_run(run.id, RunStatus::Sent, None, now).await?
            }
            RunResolution::Failed { message, .. } => {
                self.runs
                    .finish_run(run.id, RunStatus::Failed, Some(message.as_str()), now)
                    .await?
            }
            RunResolution::Discard => self.runs.discard_run(run.id).await?,
        };

        if applied {
            info!(vendor_id = %run.vendor_id, run_id = %run.id, resolution = ?resolution, "Billing run resolved");
        } else {
            warn!(
                vendor_id = %run.vendor_id,
                run_id = %run.id,
                resolution = ?resolution,
                "Billing run was no longer processing; terminal write skipped"
            );
        }
        Ok(())
    }

    /// Best-effort failure record for an attempt that never owned a row
    pub async fn record_failed_attempt(
        &self,
        vendor_id: VendorId,
        period_key: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        self.runs
            .record_failed_attempt(vendor_id, period_key, message, now)
            .await
            .map_err(Into::into)
    }
}
