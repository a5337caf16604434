//! Pre-built Test Fixtures
//!
//! Provides ready-to-use test data for the billing engine. Dates centre on
//! September 2026 being billed on 1 October 2026.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use core_kernel::{Money, ProjectId, VatRate};
use domain_billing::{
    BillingPeriod, BillingPorts, BillingRunEngine, BillingRunOutcome, BillingRunSummary,
    EngineConfig, InMemoryBillingStore, ManualClock, PlainTextTimesheetRenderer,
    RecordingMailer, TriggerOptions,
};
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    /// Standard hourly rate ex VAT
    pub fn hourly_rate() -> Money {
        Money::pounds(dec!(75.00))
    }

    /// Standard mileage rate
    pub fn mileage_rate() -> Money {
        Money::new(dec!(0.42))
    }

    /// A VAT-inclusive monthly cap
    pub fn cap_500() -> Money {
        Money::pounds(dec!(500.00))
    }

    /// Standard UK VAT
    pub fn standard_vat() -> VatRate {
        VatRate::standard()
    }
}

/// Fixture for temporal test data
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// 09:00 UTC on 1 October 2026 (10:00 BST), a billing day
    pub fn billing_day() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap()
    }

    /// The billing day one month later
    pub fn next_billing_day() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 11, 1, 9, 0, 0).unwrap()
    }

    /// A day that is not the first of the month
    pub fn mid_month() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    /// The period billed on [`Self::billing_day`]
    pub fn september_2026() -> BillingPeriod {
        BillingPeriod::from_key("2026-09").unwrap()
    }

    /// A working day in September 2026
    pub fn work_date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, day).unwrap()
    }

    /// A working day in October 2026
    pub fn october_date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, day).unwrap()
    }

    /// Creation timestamp used by builders
    pub fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 8, 0, 0).unwrap()
    }
}

/// Fixture for string test data
pub struct StringFixtures;

impl StringFixtures {
    pub fn vendor_name() -> &'static str {
        "The Anchor"
    }

    pub fn project_name() -> &'static str {
        "Website rebuild"
    }

    pub fn vendor_email() -> &'static str {
        "accounts@anchor.test"
    }
}

/// Fixture for stable identifiers
pub struct IdFixtures;

impl IdFixtures {
    /// The project behind [`StringFixtures::project_name`]
    pub fn project_id() -> ProjectId {
        ProjectId::from_uuid(Uuid::from_u128(0x0a11_ce00))
    }
}

/// An engine wired to in-memory ports and a hand-driven clock
///
/// The clock starts on [`TemporalFixtures::billing_day`] and is set to the
/// trigger instant by [`BillingHarness::run_at`].
pub struct BillingHarness {
    pub store: Arc<InMemoryBillingStore>,
    pub mailer: Arc<RecordingMailer>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<BillingRunEngine>,
}

impl Default for BillingHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl BillingHarness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_mailer(config, RecordingMailer::new())
    }

    pub fn with_mailer(config: EngineConfig, mailer: RecordingMailer) -> Self {
        Self::assemble(
            config,
            mailer,
            Arc::new(ManualClock::new(TemporalFixtures::billing_day())),
        )
    }

    /// A harness whose mailer moves the clock on by `latency` per send
    pub fn with_slow_mailer(latency: Duration) -> Self {
        let clock = Arc::new(ManualClock::new(TemporalFixtures::billing_day()));
        let mailer = RecordingMailer::slow(clock.clone(), latency);
        Self::assemble(EngineConfig::default(), mailer, clock)
    }

    fn assemble(config: EngineConfig, mailer: RecordingMailer, clock: Arc<ManualClock>) -> Self {
        let store = Arc::new(InMemoryBillingStore::new());
        let mailer = Arc::new(mailer);
        let ports = BillingPorts::from_store(
            store.clone(),
            mailer.clone(),
            Arc::new(PlainTextTimesheetRenderer),
        );
        let engine = Arc::new(BillingRunEngine::new(ports, config).with_clock(clock.clone()));
        Self {
            store,
            mailer,
            clock,
            engine,
        }
    }

    /// Runs the engine at `now`, forced, and returns the summary
    pub async fn run_at(&self, now: DateTime<Utc>) -> BillingRunSummary {
        self.clock.set(now);
        match self
            .engine
            .run(now, TriggerOptions { force: true })
            .await
            .expect("billing run failed")
        {
            BillingRunOutcome::Completed(summary) => summary,
            BillingRunOutcome::NotScheduled(skip) => {
                panic!("forced run was not scheduled: {:?}", skip)
            }
        }
    }

    /// Runs the engine on the standard billing day
    pub async fn run(&self) -> BillingRunSummary {
        self.run_at(TemporalFixtures::billing_day()).await
    }
}
