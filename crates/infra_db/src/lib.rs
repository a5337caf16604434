//! Infrastructure Database Layer
//!
//! PostgreSQL persistence for the billing run engine, built on SQLx.
//!
//! # Architecture
//!
//! The crate follows the repository pattern: each repository owns the SQL for
//! one group of tables and maps rows into domain types. `PostgresBillingAdapter`
//! composes the repositories and implements the storage ports the engine
//! depends on.
//!
//! # Concurrency
//!
//! The engine's exclusion guarantees rest on the database:
//!
//! - `billing_runs` has a unique key on `(vendor_id, period_key)`
//! - run reclaim and terminal writes are conditional `UPDATE`s
//! - unit claims only match rows that are still `unbilled`
//! - invoice header, lines and number allocation share one transaction
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresBillingAdapter};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/oj_projects")).await?;
//! run_migrations(&pool).await?;
//! let adapter = PostgresBillingAdapter::new(pool, "INV");
//! ```

pub mod pool;
pub mod error;
pub mod repositories;
pub mod adapters;

pub use pool::{create_pool, create_pool_from_url, run_migrations, DatabaseConfig, DatabasePool};
pub use error::DatabaseError;
pub use adapters::PostgresBillingAdapter;
