//! Domain Adapters
//!
//! Adapter implementations connecting the billing domain's storage ports to
//! the PostgreSQL repositories.
//!
//! # Usage
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresBillingAdapter;
//! use domain_billing::BillingRunPort;
//!
//! let adapter = PostgresBillingAdapter::new(pool, "INV");
//! let run = adapter.find_run(vendor_id, "2026-09").await?;
//! ```

pub mod billing;

pub use billing::PostgresBillingAdapter;
