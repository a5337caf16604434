//! HTTP API Layer
//!
//! The HTTP surface of the recurring billing run engine, built on Axum.
//!
//! # Architecture
//!
//! - **Handlers**: the cron trigger and health checks
//! - **Middleware**: shared-secret auth, tracing, audit logging
//! - **DTOs**: query and response bodies
//! - **Mailer**: SMTP delivery for invoice emails
//! - **Error Handling**: consistent JSON error responses
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_api::{create_router, AppState};
//!
//! let state = AppState::new(engine, adapter, config);
//! let app = create_router(state);
//! axum::serve(listener, app).await?;
//! ```

pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod middleware;

use std::sync::Arc;

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

pub use core_kernel::{Clock, FixedClock, SystemClock};
use core_kernel::HealthCheckable;
use domain_billing::BillingRunEngine;

use crate::config::ApiConfig;
use crate::handlers::{billing, health};
use crate::middleware::{audit_middleware, cron_auth_middleware};

/// Path the scheduler calls
pub const CRON_BILLING_PATH: &str = "/api/cron/oj-projects-billing";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BillingRunEngine>,
    pub storage_health: Arc<dyn HealthCheckable>,
    pub clock: Arc<dyn Clock>,
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(
        engine: Arc<BillingRunEngine>,
        storage_health: Arc<dyn HealthCheckable>,
        config: ApiConfig,
    ) -> Self {
        Self {
            engine,
            storage_health,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replaces the wall clock, e.g. to pin the billing day in tests
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Creates the main API router
pub fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check));

    let cron_routes = Router::new()
        .route(
            CRON_BILLING_PATH,
            get(billing::run_billing).post(billing::run_billing),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            cron_auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(cron_routes)
        .layer(axum_middleware::from_fn(audit_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
