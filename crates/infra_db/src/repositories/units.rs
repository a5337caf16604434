//! Billable unit repository
//!
//! Time entries, mileage entries and recurring charge instances share one
//! lock protocol: `billing_run_id` is set on claim and cleared on release,
//! and every transition is guarded by the unit's current status.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use core_kernel::{
    BillingRunId, InvoiceId, MileageEntryId, Money, ProjectId, RecurringChargeId,
    RecurringChargeInstanceId, TimeEntryId, VatRate, VendorId,
};
use domain_billing::{
    MileageEntry, NewRecurringChargeInstance, RecurringChargeInstance, TimeEntry, UnitStatus,
};

use crate::error::DatabaseError;

const UNIT_TABLES: [&str; 3] = ["recurring_charge_instances", "mileage_entries", "time_entries"];

const TIME_SELECT: &str = r#"
    SELECT t.id, t.vendor_id, t.project_id, p.name AS project_name, t.entry_date,
           t.duration_minutes, t.hourly_rate_ex_vat, t.vat_rate, t.description,
           t.status, t.billing_run_id, t.invoice_id, t.created_at
    FROM time_entries t
    JOIN projects p ON p.id = t.project_id
"#;

const MILEAGE_SELECT: &str = r#"
    SELECT m.id, m.vendor_id, m.project_id, p.name AS project_name, m.entry_date,
           m.miles, m.mileage_rate, m.description,
           m.status, m.billing_run_id, m.invoice_id, m.created_at
    FROM mileage_entries m
    LEFT JOIN projects p ON p.id = m.project_id
"#;

const INSTANCE_SELECT: &str = r#"
    SELECT id, vendor_id, recurring_charge_id, period_key, period_start, period_end,
           description, amount_ex_vat, vat_rate, sort_order,
           status, billing_run_id, invoice_id, created_at
    FROM recurring_charge_instances
"#;

fn parse_status(table: &str, raw: &str) -> Result<UnitStatus, DatabaseError> {
    raw.parse()
        .map_err(|e| DatabaseError::invalid_column(&format!("{}.status", table), e))
}

/// Database row for `time_entries` joined with its project name
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TimeEntryRow {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub project_id: Uuid,
    pub project_name: String,
    pub entry_date: NaiveDate,
    pub duration_minutes: i32,
    pub hourly_rate_ex_vat: Decimal,
    pub vat_rate: Decimal,
    pub description: Option<String>,
    pub status: String,
    pub billing_run_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TimeEntryRow> for TimeEntry {
    type Error = DatabaseError;

    fn try_from(row: TimeEntryRow) -> Result<Self, Self::Error> {
        let duration_minutes = u32::try_from(row.duration_minutes)
            .map_err(|e| DatabaseError::invalid_column("time_entries.duration_minutes", e))?;

        Ok(TimeEntry {
            id: TimeEntryId::from(row.id),
            vendor_id: VendorId::from(row.vendor_id),
            project_id: ProjectId::from(row.project_id),
            project_name: row.project_name,
            entry_date: row.entry_date,
            duration_minutes,
            hourly_rate_ex_vat: Money::new(row.hourly_rate_ex_vat),
            vat_rate: VatRate::percent(row.vat_rate),
            description: row.description,
            status: parse_status("time_entries", &row.status)?,
            billing_run_id: row.billing_run_id.map(BillingRunId::from),
            invoice_id: row.invoice_id.map(InvoiceId::from),
            created_at: row.created_at,
        })
    }
}

/// Database row for `mileage_entries`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MileageEntryRow {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub project_id: Option<Uuid>,
    pub project_name: Option<String>,
    pub entry_date: NaiveDate,
    pub miles: Decimal,
    pub mileage_rate: Decimal,
    pub description: Option<String>,
    pub status: String,
    pub billing_run_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MileageEntryRow> for MileageEntry {
    type Error = DatabaseError;

    fn try_from(row: MileageEntryRow) -> Result<Self, Self::Error> {
        Ok(MileageEntry {
            id: MileageEntryId::from(row.id),
            vendor_id: VendorId::from(row.vendor_id),
            project_id: row.project_id.map(ProjectId::from),
            project_name: row.project_name,
            entry_date: row.entry_date,
            miles: row.miles,
            mileage_rate: Money::new(row.mileage_rate),
            description: row.description,
            status: parse_status("mileage_entries", &row.status)?,
            billing_run_id: row.billing_run_id.map(BillingRunId::from),
            invoice_id: row.invoice_id.map(InvoiceId::from),
            created_at: row.created_at,
        })
    }
}

/// Database row for `recurring_charge_instances`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecurringInstanceRow {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub recurring_charge_id: Uuid,
    pub period_key: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub description: String,
    pub amount_ex_vat: Decimal,
    pub vat_rate: Decimal,
    pub sort_order: i32,
    pub status: String,
    pub billing_run_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RecurringInstanceRow> for RecurringChargeInstance {
    type Error = DatabaseError;

    fn try_from(row: RecurringInstanceRow) -> Result<Self, Self::Error> {
        Ok(RecurringChargeInstance {
            id: RecurringChargeInstanceId::from(row.id),
            vendor_id: VendorId::from(row.vendor_id),
            recurring_charge_id: RecurringChargeId::from(row.recurring_charge_id),
            period_key: row.period_key,
            period_start: row.period_start,
            period_end: row.period_end,
            description: row.description,
            amount_ex_vat: Money::new(row.amount_ex_vat),
            vat_rate: VatRate::percent(row.vat_rate),
            sort_order: row.sort_order,
            status: parse_status("recurring_charge_instances", &row.status)?,
            billing_run_id: row.billing_run_id.map(BillingRunId::from),
            invoice_id: row.invoice_id.map(InvoiceId::from),
            created_at: row.created_at,
        })
    }
}

/// Unit ids grouped by table, in the order the tables are locked
#[derive(Debug, Clone, Default)]
pub struct UnitIds {
    pub recurring_instances: Vec<Uuid>,
    pub mileage_entries: Vec<Uuid>,
    pub time_entries: Vec<Uuid>,
}

impl UnitIds {
    fn per_table(&self) -> [(&'static str, &Vec<Uuid>); 3] {
        [
            (UNIT_TABLES[0], &self.recurring_instances),
            (UNIT_TABLES[1], &self.mileage_entries),
            (UNIT_TABLES[2], &self.time_entries),
        ]
    }
}

/// All three kinds of unit loaded for one query
#[derive(Debug, Clone, Default)]
pub struct UnitRows {
    pub recurring_instances: Vec<RecurringInstanceRow>,
    pub mileage_entries: Vec<MileageEntryRow>,
    pub time_entries: Vec<TimeEntryRow>,
}

/// Repository for billable units
#[derive(Debug, Clone)]
pub struct BillableUnitRepository {
    pool: PgPool,
}

impl BillableUnitRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Vendors with unbilled time or mileage dated on or before `through`
    pub async fn vendors_with_unbilled_entries(
        &self,
        through: NaiveDate,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT vendor_id FROM time_entries WHERE status = 'unbilled' AND entry_date <= $1
            UNION
            SELECT vendor_id FROM mileage_entries WHERE status = 'unbilled' AND entry_date <= $1
            "#,
        )
        .bind(through)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    pub async fn vendors_with_active_recurring_charges(&self) -> Result<Vec<Uuid>, DatabaseError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT vendor_id FROM recurring_charges WHERE is_active",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    pub async fn vendors_with_unbilled_recurring_instances(
        &self,
        through: NaiveDate,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT vendor_id FROM recurring_charge_instances
            WHERE status = 'unbilled' AND period_end <= $1
            "#,
        )
        .bind(through)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Insert-if-absent on `(vendor_id, recurring_charge_id, period_key)`
    ///
    /// Returns how many rows were newly created.
    pub async fn ensure_recurring_instances(
        &self,
        instances: &[NewRecurringChargeInstance],
    ) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut created = 0;

        for instance in instances {
            let result = sqlx::query(
                r#"
                INSERT INTO recurring_charge_instances (
                    id, vendor_id, recurring_charge_id, period_key, period_start, period_end,
                    description, amount_ex_vat, vat_rate, sort_order, status
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'unbilled')
                ON CONFLICT (vendor_id, recurring_charge_id, period_key) DO NOTHING
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(Uuid::from(instance.vendor_id))
            .bind(Uuid::from(instance.recurring_charge_id))
            .bind(&instance.period_key)
            .bind(instance.period_start)
            .bind(instance.period_end)
            .bind(&instance.description)
            .bind(instance.amount_ex_vat.amount())
            .bind(instance.vat_rate.as_percentage())
            .bind(instance.sort_order)
            .execute(&mut *tx)
            .await?;
            created += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        Ok(created)
    }

    /// Every `unbilled` unit for the vendor dated on or before `through`
    pub async fn load_eligible(
        &self,
        vendor_id: Uuid,
        through: NaiveDate,
    ) -> Result<UnitRows, DatabaseError> {
        let recurring_instances = sqlx::query_as::<_, RecurringInstanceRow>(&format!(
            "{} WHERE vendor_id = $1 AND status = 'unbilled' AND period_end <= $2",
            INSTANCE_SELECT
        ))
        .bind(vendor_id)
        .bind(through)
        .fetch_all(&self.pool)
        .await?;

        let mileage_entries = sqlx::query_as::<_, MileageEntryRow>(&format!(
            "{} WHERE m.vendor_id = $1 AND m.status = 'unbilled' AND m.entry_date <= $2",
            MILEAGE_SELECT
        ))
        .bind(vendor_id)
        .bind(through)
        .fetch_all(&self.pool)
        .await?;

        let time_entries = sqlx::query_as::<_, TimeEntryRow>(&format!(
            "{} WHERE t.vendor_id = $1 AND t.status = 'unbilled' AND t.entry_date <= $2",
            TIME_SELECT
        ))
        .bind(vendor_id)
        .bind(through)
        .fetch_all(&self.pool)
        .await?;

        Ok(UnitRows {
            recurring_instances,
            mileage_entries,
            time_entries,
        })
    }

    /// Units still `billing_pending` under `run_id`
    pub async fn pending(&self, run_id: Uuid) -> Result<UnitRows, DatabaseError> {
        let recurring_instances = sqlx::query_as::<_, RecurringInstanceRow>(&format!(
            "{} WHERE billing_run_id = $1 AND status = 'billing_pending'",
            INSTANCE_SELECT
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let mileage_entries = sqlx::query_as::<_, MileageEntryRow>(&format!(
            "{} WHERE m.billing_run_id = $1 AND m.status = 'billing_pending'",
            MILEAGE_SELECT
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let time_entries = sqlx::query_as::<_, TimeEntryRow>(&format!(
            "{} WHERE t.billing_run_id = $1 AND t.status = 'billing_pending'",
            TIME_SELECT
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(UnitRows {
            recurring_instances,
            mileage_entries,
            time_entries,
        })
    }

    /// `unbilled -> billing_pending` for the given ids, tagged with `run_id`
    ///
    /// Rows claimed by someone else in the meantime are skipped, so the
    /// returned count may be lower than the number of ids.
    pub async fn claim(&self, run_id: Uuid, ids: &UnitIds) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut claimed = 0;

        for (table, ids) in ids.per_table() {
            if ids.is_empty() {
                continue;
            }
            let result = sqlx::query(&format!(
                r#"
                UPDATE {}
                SET status = 'billing_pending', billing_run_id = $1, updated_at = now()
                WHERE id = ANY($2) AND status = 'unbilled'
                "#,
                table
            ))
            .bind(run_id)
            .bind(ids)
            .execute(&mut *tx)
            .await?;
            claimed += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        Ok(claimed)
    }

    /// `billing_pending -> unbilled` for every unit tagged with `run_id`
    pub async fn release(&self, run_id: Uuid) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut released = 0;

        for table in UNIT_TABLES {
            let result = sqlx::query(&format!(
                r#"
                UPDATE {}
                SET status = 'unbilled', billing_run_id = NULL, updated_at = now()
                WHERE billing_run_id = $1 AND status = 'billing_pending'
                "#,
                table
            ))
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
            released += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        Ok(released)
    }

    /// Moves every unit tagged with `run_id` to `target` against `invoice_id`
    ///
    /// `from_statuses` lists the statuses that may legally move to `target`;
    /// units already at `target` are included so a repeated settle counts
    /// them again.
    pub async fn settle(
        &self,
        run_id: Uuid,
        invoice_id: Uuid,
        target: UnitStatus,
        from_statuses: &[UnitStatus],
    ) -> Result<u64, DatabaseError> {
        let from: Vec<String> = from_statuses
            .iter()
            .chain(std::iter::once(&target))
            .map(|status| status.as_str().to_string())
            .collect();

        let mut tx = self.pool.begin().await?;
        let mut settled = 0;

        for table in UNIT_TABLES {
            let result = sqlx::query(&format!(
                r#"
                UPDATE {}
                SET status = $3, invoice_id = $2, updated_at = now()
                WHERE billing_run_id = $1 AND status = ANY($4)
                "#,
                table
            ))
            .bind(run_id)
            .bind(invoice_id)
            .bind(target.as_str())
            .bind(&from)
            .execute(&mut *tx)
            .await?;
            settled += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        Ok(settled)
    }
}
