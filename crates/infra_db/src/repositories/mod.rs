//! Repository implementations for billing tables
//!
//! Each repository encapsulates the SQL for one group of tables and maps
//! between database rows and domain types. Queries are built at runtime with
//! `sqlx::query_as` so the crate compiles without a live database.

pub mod runs;
pub mod units;
pub mod invoices;
pub mod vendors;

pub use runs::BillingRunRepository;
pub use units::BillableUnitRepository;
pub use invoices::InvoiceRepository;
pub use vendors::VendorRepository;
