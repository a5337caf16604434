//! Strongly-typed identifiers
//!
//! Every row the billing engine touches is keyed by a UUID v7, so ids sort by
//! creation time. Each table gets its own newtype: a time entry id can never
//! be passed where a mileage entry id is expected. `Display` adds a short
//! prefix for logs (`RUN-0190...`); serde and the database see the bare UUID.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

macro_rules! define_id {
    ($name:ident, $prefix:literal, $kind:literal) => {
        #[doc = concat!("Identifier of a ", $kind, " (`", $prefix, "-` in logs)")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Mints a fresh time-ordered identifier
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        /// Accepts both the prefixed log form and a bare UUID
        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Uuid::parse_str(raw)
                    .map(Self)
                    .map_err(|_| CoreError::unknown($kind, s))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

// Vendor directory
define_id!(VendorId, "VND", "vendor");
define_id!(ContactId, "CNT", "vendor contact");
define_id!(ProjectId, "PRJ", "project");

// Billable work
define_id!(TimeEntryId, "TIME", "time entry");
define_id!(MileageEntryId, "MILE", "mileage entry");
define_id!(RecurringChargeId, "RCH", "recurring charge");
define_id!(RecurringChargeInstanceId, "RCI", "recurring charge instance");

// Runs and invoices
define_id!(BillingRunId, "RUN", "billing run");
define_id!(InvoiceId, "INV", "invoice");
define_id!(InvoiceLineItemId, "INVL", "invoice line item");
