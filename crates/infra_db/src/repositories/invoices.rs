//! Invoice repository
//!
//! Invoice headers, line items and number allocation. Creating an invoice
//! takes the next number from `invoice_series`, writes the header and writes
//! every line in a single transaction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use core_kernel::{BillingRunId, InvoiceId, Money, VendorId};
use domain_billing::{InvoiceDraft, InvoiceRecord, InvoiceStatus};

use crate::error::DatabaseError;

/// Formats an allocated sequence value as an invoice number
pub fn format_invoice_number(series: &str, value: i64) -> String {
    format!("{}-{:04}", series, value)
}

/// Database row for `invoices`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceRow {
    pub id: Uuid,
    pub invoice_number: String,
    pub vendor_id: Uuid,
    pub billing_run_id: Option<Uuid>,
    pub period_key: String,
    pub status: String,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub reference: String,
    pub subtotal: Decimal,
    pub vat_total: Decimal,
    pub total: Decimal,
    pub notes: String,
    pub internal_notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for InvoiceRecord {
    type Error = DatabaseError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let status: InvoiceStatus = row
            .status
            .parse()
            .map_err(|e| DatabaseError::invalid_column("invoices.status", e))?;

        Ok(InvoiceRecord {
            id: InvoiceId::from(row.id),
            invoice_number: row.invoice_number,
            vendor_id: VendorId::from(row.vendor_id),
            billing_run_id: row.billing_run_id.map(BillingRunId::from),
            status,
            invoice_date: row.invoice_date,
            due_date: row.due_date,
            reference: row.reference,
            subtotal: Money::new(row.subtotal),
            vat_total: Money::new(row.vat_total),
            total: Money::new(row.total),
            notes: row.notes,
            internal_notes: row.internal_notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for invoices
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: PgPool,
}

impl InvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates header and lines atomically under the next number in `series`
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::TransactionFailed` if the commit fails; nothing
    /// is written in that case.
    pub async fn create(
        &self,
        draft: &InvoiceDraft,
        series: &str,
        now: DateTime<Utc>,
    ) -> Result<InvoiceRow, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let sequence = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO invoice_series (series, next_value) VALUES ($1, 2)
            ON CONFLICT (series) DO UPDATE SET next_value = invoice_series.next_value + 1
            RETURNING next_value - 1
            "#,
        )
        .bind(series)
        .fetch_one(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            INSERT INTO invoices (
                id, invoice_number, vendor_id, billing_run_id, period_key, status,
                invoice_date, due_date, reference, subtotal, vat_total, total,
                notes, internal_notes, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, 'draft', $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(format_invoice_number(series, sequence))
        .bind(Uuid::from(draft.vendor_id))
        .bind(Uuid::from(draft.billing_run_id))
        .bind(&draft.period_key)
        .bind(draft.invoice_date)
        .bind(draft.due_date)
        .bind(&draft.reference)
        .bind(draft.subtotal().amount())
        .bind(draft.vat_total().amount())
        .bind(draft.total().amount())
        .bind(&draft.notes)
        .bind(&draft.internal_notes)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for (position, line) in draft.line_items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO invoice_line_items (
                    id, invoice_id, position, description, kind, quantity, unit_price,
                    vat_rate, subtotal, vat_amount, total
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(row.id)
            .bind(position as i32)
            .bind(&line.description)
            .bind(line.kind.as_str())
            .bind(line.quantity)
            .bind(line.unit_price.amount())
            .bind(line.vat_rate.as_percentage())
            .bind(line.subtotal().amount())
            .bind(line.vat().amount())
            .bind(line.total().amount())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        Ok(row)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<InvoiceRow>, DatabaseError> {
        let row = sqlx::query_as::<_, InvoiceRow>("SELECT * FROM invoices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    /// The earliest invoice tagged with `run_id`
    pub async fn find_for_run(&self, run_id: Uuid) -> Result<Option<InvoiceRow>, DatabaseError> {
        let row = sqlx::query_as::<_, InvoiceRow>(
            "SELECT * FROM invoices WHERE billing_run_id = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// `draft -> sent`; an invoice already past draft is left as it is
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no invoice has this id
    pub async fn mark_sent(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE invoices SET status = 'sent', updated_at = $2 WHERE id = $1 AND status = 'draft'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM invoices WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        if exists {
            Ok(())
        } else {
            Err(DatabaseError::not_found("Invoice", id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_invoice_number_format() {
        assert_eq!(format_invoice_number("INV", 7), "INV-0007");
        assert_eq!(format_invoice_number("OJP", 12345), "OJP-12345");
    }

    #[test]
    fn test_row_maps_to_record() {
        let now = Utc::now();
        let row = InvoiceRow {
            id: Uuid::now_v7(),
            invoice_number: "INV-0001".to_string(),
            vendor_id: Uuid::now_v7(),
            billing_run_id: Some(Uuid::now_v7()),
            period_key: "2026-09".to_string(),
            status: "partially_paid".to_string(),
            invoice_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2026, 10, 31).unwrap(),
            reference: "OJ Projects September 2026".to_string(),
            subtotal: dec!(764.00),
            vat_total: dec!(152.80),
            total: dec!(916.80),
            notes: String::new(),
            internal_notes: String::new(),
            created_at: now,
            updated_at: now,
        };

        let record = InvoiceRecord::try_from(row).unwrap();

        assert_eq!(record.status, InvoiceStatus::PartiallyPaid);
        assert!(record.status.is_dispatched());
        assert_eq!(record.total, Money::new(dec!(916.80)));
    }
}
