//! Connection pool and migrations
//!
//! One invocation bills vendors one after another, so the pool is small. Every
//! connection is tagged with an application name so billing sessions are easy
//! to find in `pg_stat_activity`, and carries a statement timeout well inside
//! the run liveness window.

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::info;

use crate::error::DatabaseError;

pub type DatabasePool = PgPool;

const APPLICATION_NAME: &str = "oj-projects-billing";

/// Pool settings
///
/// ```rust
/// use std::time::Duration;
/// use infra_db::DatabaseConfig;
///
/// let config = DatabaseConfig::new("postgres://localhost/oj_projects")
///     .max_connections(8)
///     .statement_timeout(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    /// Server-side limit for any single statement
    pub statement_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(5 * 60),
            statement_timeout: Duration::from_secs(30),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Parses the URL and applies the per-connection session settings
    pub fn connect_options(&self) -> Result<PgConnectOptions, DatabaseError> {
        let statement_timeout = format!("{}", self.statement_timeout.as_millis());
        PgConnectOptions::from_str(&self.url)
            .map(|options| {
                options
                    .application_name(APPLICATION_NAME)
                    .options([("statement_timeout", statement_timeout.as_str())])
            })
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Invalid database URL: {}", e)))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new("postgres://localhost/oj_projects")
    }
}

/// Opens the pool
///
/// # Errors
///
/// `DatabaseError::ConnectionFailed` when the URL is invalid or the first
/// connection cannot be made.
pub async fn create_pool(config: DatabaseConfig) -> Result<DatabasePool, DatabaseError> {
    info!(
        max_connections = config.max_connections,
        statement_timeout_ms = config.statement_timeout.as_millis() as u64,
        "Creating database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect_with(config.connect_options()?)
        .await
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

    info!("Database pool ready");
    Ok(pool)
}

pub async fn create_pool_from_url(url: &str) -> Result<DatabasePool, DatabaseError> {
    create_pool(DatabaseConfig::new(url)).await
}

/// Applies the embedded migrations under `migrations/`
///
/// Already-applied versions are skipped, so every server start calls this.
pub async fn run_migrations(pool: &DatabasePool) -> Result<(), DatabaseError> {
    info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

    info!("Database migrations complete");
    Ok(())
}
