//! Ports and Adapters Infrastructure
//!
//! Foundational types for the hexagonal (ports and adapters) layout used by
//! the billing engine. The engine talks to its data store, the invoicing
//! subsystem and the mail service only through port traits; `infra_db` and
//! `interface_api` provide the adapters.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  BillingRunEngine (domain)                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  BillingRunPort, BillableUnitPort, InvoicePort,              │
//! │  VendorDirectoryPort, InvoiceMailer, TimesheetRenderer       │
//! └─────────────────────────────────────────────────────────────┘
//!                    ▲                         ▲
//!         ┌─────────┴─────────┐     ┌────────┴────────┐
//!         │  PostgreSQL       │     │  SMTP mailer,   │
//!         │  (infra_db)       │     │  renderers      │
//!         └───────────────────┘     └─────────────────┘
//! ```

use std::fmt;
use thiserror::Error;
use serde::{Deserialize, Serialize};

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by every port
///
/// The engine only cares which bucket a failure falls in: a conflict on the
/// run ledger means another invocation got there first, a transient error is
/// retried by the next scheduled run, anything else fails the vendor.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("Not found: {entity} {id}")]
    NotFound { entity: String, id: String },

    /// Input the adapter refused before touching anything, e.g. a bad address
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Unique key or conditional-update conflict
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// The data store could not be reached or timed out
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// A collaborator that is not configured, e.g. SMTP without credentials
    #[error("Service unavailable: {service}")]
    Unavailable { service: String },

    #[error("Rejected by {service}: {message}")]
    Rejected { service: String, message: String },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl PortError {
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        PortError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PortError::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        PortError::Conflict {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        PortError::Connection {
            message: message.into(),
        }
    }

    pub fn unavailable(service: impl Into<String>) -> Self {
        PortError::Unavailable {
            service: service.into(),
        }
    }

    pub fn rejected(service: impl Into<String>, message: impl Into<String>) -> Self {
        PortError::Rejected {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        PortError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an adapter error, keeping it as the source
    pub fn internal_from(message: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        PortError::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Failures the next scheduled invocation may not hit again
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Connection { .. } | PortError::Unavailable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PortError::Conflict { .. })
    }
}

/// Marker trait for all domain ports
///
/// All port traits extend this marker so they are thread-safe and can be
/// shared behind `Arc<dyn ...>` in async contexts.
pub trait DomainPort: Send + Sync + 'static {}

/// Whether a storage or delivery adapter can serve the next billing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    Healthy,
    Unhealthy,
}

/// One probe of an adapter, as reported by the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub adapter_id: String,
    pub status: AdapterHealth,
    pub latency_ms: u64,
    pub message: Option<String>,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

impl HealthCheckResult {
    pub fn healthy(adapter_id: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            status: AdapterHealth::Healthy,
            latency_ms,
            message: None,
            checked_at: chrono::Utc::now(),
        }
    }

    pub fn unhealthy(
        adapter_id: impl Into<String>,
        latency_ms: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            status: AdapterHealth::Unhealthy,
            latency_ms,
            message: Some(message.into()),
            checked_at: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == AdapterHealth::Healthy
    }
}

/// Adapters the readiness probe can query
#[async_trait::async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn health_check(&self) -> HealthCheckResult;
}
