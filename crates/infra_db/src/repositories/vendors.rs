//! Vendor directory repository
//!
//! Billing settings, contacts and recurring charge definitions.

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use core_kernel::{ContactId, Money, RecurringChargeId, VatRate, VendorId};
use domain_billing::{BillingMode, RecurringCharge, VendorBillingSettings, VendorContact};

use crate::error::DatabaseError;

/// Database row for `vendor_billing_settings`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VendorSettingsRow {
    pub vendor_id: Uuid,
    pub vendor_name: String,
    pub billing_mode: String,
    pub monthly_cap_inc_vat: Option<Decimal>,
    pub payment_terms_days: Option<i32>,
    pub invoice_email: Option<String>,
}

impl TryFrom<VendorSettingsRow> for VendorBillingSettings {
    type Error = DatabaseError;

    fn try_from(row: VendorSettingsRow) -> Result<Self, Self::Error> {
        let billing_mode: BillingMode = row
            .billing_mode
            .parse()
            .map_err(|e| DatabaseError::invalid_column("vendor_billing_settings.billing_mode", e))?;
        let payment_terms_days = row
            .payment_terms_days
            .map(u32::try_from)
            .transpose()
            .map_err(|e| {
                DatabaseError::invalid_column("vendor_billing_settings.payment_terms_days", e)
            })?;

        Ok(VendorBillingSettings {
            vendor_id: VendorId::from(row.vendor_id),
            vendor_name: row.vendor_name,
            billing_mode,
            monthly_cap_inc_vat: row.monthly_cap_inc_vat.map(Money::new),
            payment_terms_days,
            invoice_email: row.invoice_email.filter(|email| !email.trim().is_empty()),
        })
    }
}

/// Database row for `vendor_contacts`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VendorContactRow {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_primary: bool,
    pub receives_invoices: bool,
}

impl From<VendorContactRow> for VendorContact {
    fn from(row: VendorContactRow) -> Self {
        VendorContact {
            id: ContactId::from(row.id),
            vendor_id: VendorId::from(row.vendor_id),
            name: row.name,
            email: row.email,
            is_primary: row.is_primary,
            receives_invoices: row.receives_invoices,
        }
    }
}

/// Database row for `recurring_charges`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecurringChargeRow {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub description: String,
    pub amount_ex_vat: Decimal,
    pub vat_rate: Decimal,
    pub sort_order: i32,
    pub is_active: bool,
}

impl From<RecurringChargeRow> for RecurringCharge {
    fn from(row: RecurringChargeRow) -> Self {
        RecurringCharge {
            id: RecurringChargeId::from(row.id),
            vendor_id: VendorId::from(row.vendor_id),
            description: row.description,
            amount_ex_vat: Money::new(row.amount_ex_vat),
            vat_rate: VatRate::percent(row.vat_rate),
            sort_order: row.sort_order,
            is_active: row.is_active,
        }
    }
}

/// Repository for vendor billing configuration
#[derive(Debug, Clone)]
pub struct VendorRepository {
    pool: PgPool,
}

impl VendorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn settings(&self, vendor_id: Uuid) -> Result<Option<VendorSettingsRow>, DatabaseError> {
        let row = sqlx::query_as::<_, VendorSettingsRow>(
            r#"
            SELECT vendor_id, vendor_name, billing_mode, monthly_cap_inc_vat,
                   payment_terms_days, invoice_email
            FROM vendor_billing_settings
            WHERE vendor_id = $1
            "#,
        )
        .bind(vendor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Contacts with the primary first, then in creation order
    pub async fn contacts(&self, vendor_id: Uuid) -> Result<Vec<VendorContactRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, VendorContactRow>(
            r#"
            SELECT id, vendor_id, name, email, is_primary, receives_invoices
            FROM vendor_contacts
            WHERE vendor_id = $1
            ORDER BY is_primary DESC, created_at
            "#,
        )
        .bind(vendor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn active_recurring_charges(
        &self,
        vendor_id: Uuid,
    ) -> Result<Vec<RecurringChargeRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, RecurringChargeRow>(
            r#"
            SELECT id, vendor_id, description, amount_ex_vat, vat_rate, sort_order, is_active
            FROM recurring_charges
            WHERE vendor_id = $1 AND is_active
            ORDER BY sort_order, description
            "#,
        )
        .bind(vendor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
