//! Billing run repository
//!
//! Owns the `billing_runs` table. Every state change other than the initial
//! insert is a conditional update so that two invocations racing on the same
//! row cannot both win.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use core_kernel::{BillingRunId, InvoiceId, Money, VendorId};
use domain_billing::{BillingRun, RunStatus, UnitSelection};

use crate::error::DatabaseError;

/// Database row for `billing_runs`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillingRunRow {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub period_key: String,
    pub status: String,
    pub invoice_id: Option<Uuid>,
    pub selected_units: Option<Json<UnitSelection>>,
    pub carried_forward_amount: Option<Decimal>,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<BillingRunRow> for BillingRun {
    type Error = DatabaseError;

    fn try_from(row: BillingRunRow) -> Result<Self, Self::Error> {
        let status: RunStatus = row
            .status
            .parse()
            .map_err(|e| DatabaseError::invalid_column("billing_runs.status", e))?;

        Ok(BillingRun {
            id: BillingRunId::from(row.id),
            vendor_id: VendorId::from(row.vendor_id),
            period_key: row.period_key,
            status,
            invoice_id: row.invoice_id.map(InvoiceId::from),
            selected_units: row.selected_units.map(|json| json.0),
            carried_forward_amount: row.carried_forward_amount.map(Money::new),
            error_message: row.error_message,
            attempts: row.attempts,
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        })
    }
}

/// Repository for billing run rows
#[derive(Debug, Clone)]
pub struct BillingRunRepository {
    pool: PgPool,
}

impl BillingRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a fresh `processing` row
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::DuplicateEntry` when the vendor already has a
    /// row for the period.
    pub async fn insert_processing(
        &self,
        id: Uuid,
        vendor_id: Uuid,
        period_key: &str,
        started_at: DateTime<Utc>,
    ) -> Result<BillingRunRow, DatabaseError> {
        let row = sqlx::query_as::<_, BillingRunRow>(
            r#"
            INSERT INTO billing_runs (id, vendor_id, period_key, status, attempts, created_at, updated_at)
            VALUES ($1, $2, $3, 'processing', 1, $4, $4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(vendor_id)
        .bind(period_key)
        .bind(started_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn find(
        &self,
        vendor_id: Uuid,
        period_key: &str,
    ) -> Result<Option<BillingRunRow>, DatabaseError> {
        let row = sqlx::query_as::<_, BillingRunRow>(
            "SELECT * FROM billing_runs WHERE vendor_id = $1 AND period_key = $2",
        )
        .bind(vendor_id)
        .bind(period_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Moves a row back to `processing` if it still has the status and
    /// heartbeat the caller observed
    ///
    /// A `sent` row is never reclaimed.
    pub async fn reclaim(
        &self,
        id: Uuid,
        expected_status: &str,
        expected_updated_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<BillingRunRow>, DatabaseError> {
        let row = sqlx::query_as::<_, BillingRunRow>(
            r#"
            UPDATE billing_runs
            SET status = 'processing',
                error_message = NULL,
                attempts = attempts + 1,
                updated_at = $4,
                finished_at = NULL
            WHERE id = $1
              AND status = $2
              AND status <> 'sent'
              AND updated_at = $3
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected_status)
        .bind(expected_updated_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn record_selection(
        &self,
        id: Uuid,
        selection: &UnitSelection,
        carried_forward_amount: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE billing_runs
            SET selected_units = $2, carried_forward_amount = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(selection))
        .bind(carried_forward_amount)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("BillingRun", id));
        }
        Ok(())
    }

    pub async fn attach_invoice(
        &self,
        id: Uuid,
        invoice_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE billing_runs SET invoice_id = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(invoice_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("BillingRun", id));
        }
        Ok(())
    }

    /// Terminal write; only a `processing` row is updated
    pub async fn finish(
        &self,
        id: Uuid,
        status: &str,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE billing_runs
            SET status = $2, error_message = $3, updated_at = $4, finished_at = $4
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error_message)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes a `processing` row that never got an invoice
    pub async fn discard(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM billing_runs WHERE id = $1 AND status = 'processing' AND invoice_id IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Inserts a `failed` row, or refreshes an existing `failed` row's message
    pub async fn record_failed_attempt(
        &self,
        id: Uuid,
        vendor_id: Uuid,
        period_key: &str,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO billing_runs
                (id, vendor_id, period_key, status, error_message, attempts, created_at, updated_at, finished_at)
            VALUES ($1, $2, $3, 'failed', $4, 1, $5, $5, $5)
            ON CONFLICT (vendor_id, period_key) DO UPDATE
            SET error_message = EXCLUDED.error_message, updated_at = EXCLUDED.updated_at
            WHERE billing_runs.status = 'failed'
            "#,
        )
        .bind(id)
        .bind(vendor_id)
        .bind(period_key)
        .bind(error_message)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn vendors_with_status(
        &self,
        period_key: &str,
        status: &str,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT vendor_id FROM billing_runs WHERE period_key = $1 AND status = $2",
        )
        .bind(period_key)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Vendors whose `processing` row has not been touched since `stale_before`
    pub async fn vendors_with_stale_processing(
        &self,
        period_key: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT vendor_id FROM billing_runs
            WHERE period_key = $1 AND status = 'processing' AND updated_at < $2
            "#,
        )
        .bind(period_key)
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
