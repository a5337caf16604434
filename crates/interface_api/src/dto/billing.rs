//! Billing run DTOs
//!
//! The response body is the engine's `BillingRunOutcome`, serialized as is:
//! either the run summary or the trigger-gate skip body.

use serde::Deserialize;

/// Query string of the cron endpoint
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TriggerQuery {
    /// Run even when it is not the first of the month
    #[serde(default)]
    pub force: bool,
}
