//! Test Data Builders
//!
//! Provides builder patterns for constructing test data with sensible defaults.
//! These builders allow tests to specify only the relevant fields while using
//! defaults for everything else.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use core_kernel::{
    BillingRunId, ContactId, MileageEntryId, Money, ProjectId, RecurringChargeId,
    TimeEntryId, VatRate, VendorId,
};
use domain_billing::{
    BillingMode, BillingRun, MileageEntry, RecurringCharge, RunStatus, TimeEntry, UnitStatus,
    VendorBillingSettings, VendorContact,
};
use rust_decimal::Decimal;

use crate::fixtures::{IdFixtures, MoneyFixtures, StringFixtures, TemporalFixtures};

/// Builder for time entries
pub struct TimeEntryBuilder {
    vendor_id: VendorId,
    project_id: ProjectId,
    project_name: String,
    entry_date: NaiveDate,
    duration_minutes: u32,
    hourly_rate_ex_vat: Money,
    vat_rate: VatRate,
    description: Option<String>,
    status: UnitStatus,
    billing_run_id: Option<BillingRunId>,
    created_at: DateTime<Utc>,
}

impl TimeEntryBuilder {
    /// One hour at the standard rate on 1 September 2026
    pub fn new(vendor_id: VendorId) -> Self {
        Self {
            vendor_id,
            project_id: IdFixtures::project_id(),
            project_name: StringFixtures::project_name().to_string(),
            entry_date: TemporalFixtures::work_date(1),
            duration_minutes: 60,
            hourly_rate_ex_vat: MoneyFixtures::hourly_rate(),
            vat_rate: MoneyFixtures::standard_vat(),
            description: None,
            status: UnitStatus::Unbilled,
            billing_run_id: None,
            created_at: TemporalFixtures::created_at(),
        }
    }

    /// Sets the project
    pub fn with_project(mut self, project_id: ProjectId, name: impl Into<String>) -> Self {
        self.project_id = project_id;
        self.project_name = name.into();
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.entry_date = date;
        self
    }

    pub fn with_minutes(mut self, minutes: u32) -> Self {
        self.duration_minutes = minutes;
        self
    }

    pub fn with_hours(self, hours: u32) -> Self {
        self.with_minutes(hours * 60)
    }

    pub fn with_rate(mut self, rate: Money) -> Self {
        self.hourly_rate_ex_vat = rate;
        self
    }

    pub fn with_vat(mut self, vat_rate: VatRate) -> Self {
        self.vat_rate = vat_rate;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks the entry as claimed by `run_id`
    pub fn claimed_by(mut self, run_id: BillingRunId) -> Self {
        self.status = UnitStatus::BillingPending;
        self.billing_run_id = Some(run_id);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn build(self) -> TimeEntry {
        TimeEntry {
            id: TimeEntryId::new(),
            vendor_id: self.vendor_id,
            project_id: self.project_id,
            project_name: self.project_name,
            entry_date: self.entry_date,
            duration_minutes: self.duration_minutes,
            hourly_rate_ex_vat: self.hourly_rate_ex_vat,
            vat_rate: self.vat_rate,
            description: self.description,
            status: self.status,
            billing_run_id: self.billing_run_id,
            invoice_id: None,
            created_at: self.created_at,
        }
    }
}

/// Builder for mileage entries
pub struct MileageEntryBuilder {
    vendor_id: VendorId,
    entry_date: NaiveDate,
    miles: Decimal,
    mileage_rate: Money,
    description: Option<String>,
    status: UnitStatus,
    billing_run_id: Option<BillingRunId>,
    created_at: DateTime<Utc>,
}

impl MileageEntryBuilder {
    /// Ten miles at the standard rate on 1 September 2026
    pub fn new(vendor_id: VendorId) -> Self {
        Self {
            vendor_id,
            entry_date: TemporalFixtures::work_date(1),
            miles: Decimal::from(10),
            mileage_rate: MoneyFixtures::mileage_rate(),
            description: None,
            status: UnitStatus::Unbilled,
            billing_run_id: None,
            created_at: TemporalFixtures::created_at(),
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.entry_date = date;
        self
    }

    pub fn with_miles(mut self, miles: Decimal) -> Self {
        self.miles = miles;
        self
    }

    pub fn with_rate(mut self, rate: Money) -> Self {
        self.mileage_rate = rate;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn claimed_by(mut self, run_id: BillingRunId) -> Self {
        self.status = UnitStatus::BillingPending;
        self.billing_run_id = Some(run_id);
        self
    }

    pub fn build(self) -> MileageEntry {
        MileageEntry {
            id: MileageEntryId::new(),
            vendor_id: self.vendor_id,
            project_id: None,
            project_name: None,
            entry_date: self.entry_date,
            miles: self.miles,
            mileage_rate: self.mileage_rate,
            description: self.description,
            status: self.status,
            billing_run_id: self.billing_run_id,
            invoice_id: None,
            created_at: self.created_at,
        }
    }
}

/// Builder for recurring charge definitions
pub struct RecurringChargeBuilder {
    vendor_id: VendorId,
    description: String,
    amount_ex_vat: Money,
    vat_rate: VatRate,
    sort_order: i32,
    is_active: bool,
}

impl RecurringChargeBuilder {
    pub fn new(vendor_id: VendorId) -> Self {
        Self {
            vendor_id,
            description: "Website hosting".to_string(),
            amount_ex_vat: Money::pounds(Decimal::from(50)),
            vat_rate: MoneyFixtures::standard_vat(),
            sort_order: 0,
            is_active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_amount(mut self, amount_ex_vat: Money) -> Self {
        self.amount_ex_vat = amount_ex_vat;
        self
    }

    pub fn with_vat(mut self, vat_rate: VatRate) -> Self {
        self.vat_rate = vat_rate;
        self
    }

    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn build(self) -> RecurringCharge {
        RecurringCharge {
            id: RecurringChargeId::new(),
            vendor_id: self.vendor_id,
            description: self.description,
            amount_ex_vat: self.amount_ex_vat,
            vat_rate: self.vat_rate,
            sort_order: self.sort_order,
            is_active: self.is_active,
        }
    }
}

/// Builder for vendor billing settings
pub struct VendorSettingsBuilder {
    settings: VendorBillingSettings,
}

impl VendorSettingsBuilder {
    /// Full billing, invoiced to the standard vendor address
    pub fn new(vendor_id: VendorId) -> Self {
        let mut settings = VendorBillingSettings::defaults_for(vendor_id);
        settings.vendor_name = StringFixtures::vendor_name().to_string();
        settings.invoice_email = Some(StringFixtures::vendor_email().to_string());
        Self { settings }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.settings.vendor_name = name.into();
        self
    }

    /// Cap mode with the given VAT-inclusive cap
    pub fn capped_at(mut self, cap: Money) -> Self {
        self.settings.billing_mode = BillingMode::Cap;
        self.settings.monthly_cap_inc_vat = Some(cap);
        self
    }

    /// Cap mode with no cap recorded
    pub fn cap_mode_without_cap(mut self) -> Self {
        self.settings.billing_mode = BillingMode::Cap;
        self.settings.monthly_cap_inc_vat = None;
        self
    }

    pub fn with_payment_terms(mut self, days: u32) -> Self {
        self.settings.payment_terms_days = Some(days);
        self
    }

    pub fn with_invoice_email(mut self, email: Option<&str>) -> Self {
        self.settings.invoice_email = email.map(str::to_string);
        self
    }

    pub fn build(self) -> VendorBillingSettings {
        self.settings
    }
}

/// Builder for vendor contacts
pub struct ContactBuilder {
    vendor_id: VendorId,
    email: Option<String>,
    is_primary: bool,
    receives_invoices: bool,
}

impl ContactBuilder {
    pub fn new(vendor_id: VendorId, email: impl Into<String>) -> Self {
        Self {
            vendor_id,
            email: Some(email.into()),
            is_primary: false,
            receives_invoices: true,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn without_invoices(mut self) -> Self {
        self.receives_invoices = false;
        self
    }

    pub fn build(self) -> VendorContact {
        VendorContact {
            id: ContactId::new(),
            vendor_id: self.vendor_id,
            name: None,
            email: self.email,
            is_primary: self.is_primary,
            receives_invoices: self.receives_invoices,
        }
    }
}

/// Builder for billing run rows, used to seed crashed or finished runs
pub struct BillingRunBuilder {
    run: BillingRun,
}

impl BillingRunBuilder {
    /// A processing run for September 2026 started at `started_at`
    pub fn new(vendor_id: VendorId, started_at: DateTime<Utc>) -> Self {
        Self {
            run: BillingRun {
                id: BillingRunId::new(),
                vendor_id,
                period_key: TemporalFixtures::september_2026().period_key,
                status: RunStatus::Processing,
                invoice_id: None,
                selected_units: None,
                carried_forward_amount: None,
                error_message: None,
                attempts: 1,
                created_at: started_at,
                updated_at: started_at,
                finished_at: None,
            },
        }
    }

    /// A processing run whose heartbeat is `age` before `now`
    pub fn aged(vendor_id: VendorId, now: DateTime<Utc>, age: Duration) -> Self {
        Self::new(vendor_id, now - age)
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.run.status = status;
        if status.is_terminal() {
            self.run.finished_at = Some(self.run.updated_at);
        }
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.run.error_message = Some(message.into());
        self
    }

    pub fn build(self) -> BillingRun {
        self.run
    }
}
