//! Test Utilities Crate
//!
//! Provides shared test infrastructure, fixtures, and helpers for the
//! recurring billing test suite.
//!
//! # Modules
//!
//! - `fixtures`: Pre-built test data and an in-memory billing harness
//! - `builders`: Builder patterns for billable units, settings and runs
//! - `assertions`: Custom assertion helpers for money and allocations
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod builders;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use assertions::*;
pub use generators::*;
