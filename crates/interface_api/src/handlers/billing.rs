//! Billing run handlers

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use tracing::{error, instrument};

use domain_billing::{BillingRunOutcome, TriggerOptions};

use crate::dto::billing::TriggerQuery;
use crate::{error::ApiError, AppState};

/// Runs the monthly billing pass
///
/// `GET|POST /api/cron/oj-projects-billing?force=true|false`. Without `force`
/// the engine only bills on the first of the month in the business time zone.
#[instrument(skip(state))]
pub async fn run_billing(
    State(state): State<AppState>,
    query: Result<Query<TriggerQuery>, QueryRejection>,
) -> Result<Json<BillingRunOutcome>, ApiError> {
    let Query(query) = query?;
    let now = state.clock.now();
    let outcome = state
        .engine
        .run(now, TriggerOptions { force: query.force })
        .await
        .map_err(|e| {
            error!(error = %e, "Billing run aborted");
            ApiError::from(e)
        })?;

    Ok(Json(outcome))
}
