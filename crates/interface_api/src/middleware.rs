//! API middleware

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::{info, warn};

use crate::auth::{bearer_token, verify_cron_secret, CronCaller};
use crate::error::ApiError;
use crate::AppState;

/// Cron authentication middleware
///
/// Accepts only `Authorization: Bearer <cron_secret>`
pub async fn cron_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let verdict = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token)
        .map(|token| verify_cron_secret(token, &state.config.cron_secret));

    match verdict {
        Some(true) => {
            let mut response = next.run(request).await;
            response.extensions_mut().insert(CronCaller);
            Ok(response)
        }
        Some(false) => {
            warn!(uri = %request.uri(), "Cron secret mismatch");
            Err(ApiError::Unauthorized)
        }
        None => {
            warn!(uri = %request.uri(), "Missing or invalid Authorization header");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Audit logging middleware
///
/// Logs every request with its outcome and duration. Wraps the whole router,
/// so rejected calls are logged too.
pub async fn audit_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let start = Utc::now();

    let response = next.run(request).await;

    let duration = Utc::now() - start;
    let status = response.status();
    let caller = if response.extensions().get::<CronCaller>().is_some() {
        "cron"
    } else {
        "anonymous"
    };

    info!(
        method = %method,
        uri = %uri,
        caller = caller,
        status = %status.as_u16(),
        duration_ms = duration.num_milliseconds(),
        "API request"
    );

    response
}
