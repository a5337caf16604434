//! Per-vendor billing settings and contacts

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use core_kernel::{ContactId, CoreError, Money, VendorId};

use crate::error::BillingError;

/// How much of a vendor's outstanding work goes on one invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    /// Invoice everything eligible
    #[default]
    Full,
    /// Invoice up to a monthly VAT-inclusive cap, carry the rest forward
    Cap,
}

impl BillingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingMode::Full => "full",
            BillingMode::Cap => "cap",
        }
    }
}

impl fmt::Display for BillingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(BillingMode::Full),
            "cap" => Ok(BillingMode::Cap),
            other => Err(CoreError::unknown("billing mode", other)),
        }
    }
}

/// Billing configuration held for a vendor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorBillingSettings {
    pub vendor_id: VendorId,
    pub vendor_name: String,
    pub billing_mode: BillingMode,
    /// VAT-inclusive monthly cap, only read in cap mode
    pub monthly_cap_inc_vat: Option<Money>,
    /// Overrides the engine's default payment terms
    pub payment_terms_days: Option<u32>,
    /// Vendor-level invoice address, used when no primary contact exists
    pub invoice_email: Option<String>,
}

impl VendorBillingSettings {
    /// Settings for a vendor with no stored configuration
    pub fn defaults_for(vendor_id: VendorId) -> Self {
        Self {
            vendor_id,
            vendor_name: vendor_id.to_string(),
            billing_mode: BillingMode::Full,
            monthly_cap_inc_vat: None,
            payment_terms_days: None,
            invoice_email: None,
        }
    }

    /// The allocation policy these settings imply
    pub fn allocation_policy(&self) -> Result<AllocationPolicy, BillingError> {
        match self.billing_mode {
            BillingMode::Full => Ok(AllocationPolicy::Full),
            BillingMode::Cap => match self.monthly_cap_inc_vat {
                Some(cap) if cap.is_positive() => Ok(AllocationPolicy::Cap { cap_inc_vat: cap }),
                _ => Err(BillingError::MissingPrerequisite(format!(
                    "Vendor {} is in cap mode but has no positive monthly cap configured",
                    self.vendor_name
                ))),
            },
        }
    }
}

/// Resolved allocation rule for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AllocationPolicy {
    Full,
    Cap { cap_inc_vat: Money },
}

impl AllocationPolicy {
    pub fn mode(&self) -> BillingMode {
        match self {
            AllocationPolicy::Full => BillingMode::Full,
            AllocationPolicy::Cap { .. } => BillingMode::Cap,
        }
    }
}

/// A person at the vendor who may receive invoices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorContact {
    pub id: ContactId,
    pub vendor_id: VendorId,
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_primary: bool,
    /// Copied on invoice emails when not the primary recipient
    pub receives_invoices: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_full_mode_policy() {
        let settings = VendorBillingSettings::defaults_for(VendorId::new());
        assert_eq!(settings.allocation_policy().unwrap(), AllocationPolicy::Full);
    }

    #[test]
    fn test_cap_mode_requires_cap() {
        let mut settings = VendorBillingSettings::defaults_for(VendorId::new());
        settings.billing_mode = BillingMode::Cap;
        assert!(matches!(
            settings.allocation_policy(),
            Err(BillingError::MissingPrerequisite(_))
        ));

        settings.monthly_cap_inc_vat = Some(Money::ZERO);
        assert!(settings.allocation_policy().is_err());

        settings.monthly_cap_inc_vat = Some(Money::pounds(dec!(500)));
        assert_eq!(
            settings.allocation_policy().unwrap(),
            AllocationPolicy::Cap { cap_inc_vat: Money::pounds(dec!(500)) }
        );
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("cap".parse::<BillingMode>().unwrap(), BillingMode::Cap);
        assert!("capped".parse::<BillingMode>().is_err());
    }
}
