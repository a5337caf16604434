//! OJ Projects Billing - API Server Binary
//!
//! Starts the HTTP server that the scheduler calls to run monthly billing.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! cargo run --bin oj-billing-api
//!
//! # Run with environment variables
//! API_CRON_SECRET=... DATABASE_URL=postgres://... cargo run --bin oj-billing-api
//! ```
//!
//! # Environment Variables
//!
//! * `API_HOST` - Server host (default: 0.0.0.0)
//! * `API_PORT` - Server port (default: 8080)
//! * `API_CRON_SECRET` - Bearer secret for the cron endpoint (required)
//! * `API_DATABASE_URL` - PostgreSQL connection string
//! * `API_BILLING_TIMEZONE` - IANA zone the business runs in (default: Europe/London)
//! * `API_SMTP_HOST`, `API_SMTP_USER`, `API_SMTP_PASSWORD`, `API_MAIL_FROM` - SMTP delivery;
//!   without all four, invoices stay as drafts
//! * `API_LOG_LEVEL` - Log level: trace, debug, info, warn, error (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use domain_billing::{BillingPorts, BillingRunEngine, PlainTextTimesheetRenderer};
use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresBillingAdapter};
use interface_api::{config::ApiConfig, create_router, mailer::SmtpInvoiceMailer, AppState};

/// Main entry point for the API server.
///
/// Initializes logging, loads configuration, connects and migrates the
/// database, wires the billing engine and serves until shutdown.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let config = load_config();

    init_tracing(&config.log_level);

    tracing::info!(
        host = %config.host,
        port = %config.port,
        timezone = %config.billing_timezone,
        "Starting OJ Projects billing server"
    );

    if config.cron_secret.is_empty() {
        tracing::warn!("API_CRON_SECRET is not set; every cron call will be rejected");
    }

    let pool = create_pool(DatabaseConfig::new(config.database_url.clone()))
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("Failed to apply migrations")?;

    let adapter = Arc::new(PostgresBillingAdapter::new(pool, config.invoice_series.clone()));

    let smtp = config.smtp_settings();
    if smtp.is_none() {
        tracing::warn!("SMTP is not configured; invoices will be created as drafts");
    }
    let mailer = SmtpInvoiceMailer::new(smtp).context("Failed to configure SMTP")?;

    let ports = BillingPorts::from_store(
        adapter.clone(),
        Arc::new(mailer),
        Arc::new(PlainTextTimesheetRenderer),
    );
    let engine_config = config
        .engine_config()
        .context("Invalid billing configuration")?;
    let engine = BillingRunEngine::new(ports, engine_config);

    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .context("Invalid server address")?;

    let state = AppState::new(Arc::new(engine), adapter, config);
    let app = create_router(state);

    tracing::info!(%addr, "Server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Loads API configuration from environment variables.
///
/// Falls back to individual variables and defaults when the prefixed
/// configuration cannot be deserialized.
fn load_config() -> ApiConfig {
    ApiConfig::from_env().unwrap_or_else(|_| {
        let defaults = ApiConfig::default();
        ApiConfig {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("API_DATABASE_URL"))
                .unwrap_or(defaults.database_url),
            log_level: std::env::var("API_LOG_LEVEL")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            cron_secret: std::env::var("API_CRON_SECRET")
                .or_else(|_| std::env::var("CRON_SECRET"))
                .unwrap_or_default(),
            ..defaults
        }
    })
}

/// Initializes the tracing subscriber for structured logging.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
