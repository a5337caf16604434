//! End-to-end tests for the billing run engine against in-memory ports

use chrono::Duration;
use rust_decimal_macros::dec;

use core_kernel::{Money, VendorId};
use domain_billing::invoice::TIMESHEET_ATTACHMENT_MARKER;
use domain_billing::{
    BillableUnit, BillingRunOutcome, EngineConfig, FailPoint, FailureKind, InvoiceStatus,
    RecordingMailer, RunStatus, TriggerOptions, UnitKind, UnitStatus, VendorRunStatus,
};
use test_utils::{
    assert_money_eq, assert_no_pending_units, assert_unit_status, BillingHarness,
    BillingRunBuilder, ContactBuilder, MileageEntryBuilder, MoneyFixtures, RecurringChargeBuilder,
    TemporalFixtures, TimeEntryBuilder, VendorSettingsBuilder,
};

const SEPTEMBER: &str = "2026-09";

/// Three time entries totalling ten hours plus forty miles
async fn seed_worked_example(harness: &BillingHarness, vendor: VendorId) {
    for (day, hours) in [(2, 4), (9, 3), (16, 3)] {
        harness
            .store
            .add_time_entry(
                TimeEntryBuilder::new(vendor)
                    .with_date(TemporalFixtures::work_date(day))
                    .with_hours(hours)
                    .build(),
            )
            .await;
    }
    harness
        .store
        .add_mileage_entry(
            MileageEntryBuilder::new(vendor)
                .with_miles(dec!(40))
                .with_date(TemporalFixtures::work_date(3))
                .build(),
        )
        .await;
}

async fn units_with_status(harness: &BillingHarness, status: UnitStatus) -> Vec<BillableUnit> {
    harness
        .store
        .all_units()
        .await
        .into_iter()
        .filter(|u| u.status() == status)
        .collect()
}

mod worked_examples {
    use super::*;

    #[tokio::test]
    async fn test_full_mode_invoice() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        seed_worked_example(&harness, vendor).await;

        let summary = harness.run().await;

        assert_eq!(summary.period, SEPTEMBER);
        assert_eq!(summary.sent, 1);
        let invoices = harness.store.invoices().await;
        assert_eq!(invoices.len(), 1);
        let invoice = &invoices[0];
        assert_money_eq(invoice.subtotal, dec!(766.80));
        assert_money_eq(invoice.vat_total, dec!(150.00));
        assert_money_eq(invoice.total, dec!(916.80));
        assert_eq!(invoice.status, InvoiceStatus::Sent);
        assert_eq!(invoice.due_date, invoice.invoice_date + Duration::days(30));

        let lines = harness.store.invoice_lines(invoice.id).await;
        assert_eq!(lines.len(), 2);
        let mileage = lines.iter().find(|l| l.kind == UnitKind::Mileage).unwrap();
        assert_money_eq(mileage.subtotal(), dec!(16.80));
        assert!(mileage.vat().is_zero());
        let time = lines.iter().find(|l| l.kind == UnitKind::Time).unwrap();
        assert_money_eq(time.subtotal(), dec!(750.00));
        assert_money_eq(time.total(), dec!(900.00));
        assert!(time.description.contains("10.00 hours"));

        assert_eq!(units_with_status(&harness, UnitStatus::Billed).await.len(), 4);
        let run = harness.store.run_for(vendor, SEPTEMBER).await.unwrap();
        assert_eq!(run.status, RunStatus::Sent);
        assert_eq!(run.invoice_id, Some(invoice.id));
        assert_eq!(run.carried_forward_amount, None);
    }

    #[tokio::test]
    async fn test_cap_mode_carries_forward() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness
            .store
            .set_settings(
                VendorSettingsBuilder::new(vendor)
                    .capped_at(MoneyFixtures::cap_500())
                    .build(),
            )
            .await;
        seed_worked_example(&harness, vendor).await;

        let summary = harness.run().await;
        assert_eq!(summary.sent, 1);

        // mileage 16.80, then 4h at 360.00 inc VAT; each 3h block would breach the cap
        let invoice = harness.store.invoices().await.remove(0);
        assert_money_eq(invoice.total, dec!(376.80));
        assert!(invoice.total <= MoneyFixtures::cap_500());
        assert!(invoice.notes.contains("Carried forward"));

        let run = harness.store.run_for(vendor, SEPTEMBER).await.unwrap();
        assert_eq!(run.carried_forward_amount, Some(Money::new(dec!(540.00))));
        assert_eq!(run.selected_units.as_ref().map(|s| s.len()), Some(2));
        assert_eq!(units_with_status(&harness, UnitStatus::Unbilled).await.len(), 2);

        // The deferred work resurfaces in October's run
        let summary = harness.run_at(TemporalFixtures::next_billing_day()).await;
        assert_eq!(summary.period, "2026-10");
        assert_eq!(summary.sent, 1);
        let october = harness
            .store
            .invoices()
            .await
            .into_iter()
            .find(|i| i.id != invoice.id)
            .unwrap();
        assert_money_eq(october.total, dec!(270.00));

        let run = harness.store.run_for(vendor, "2026-10").await.unwrap();
        assert_eq!(run.carried_forward_amount, Some(Money::new(dec!(270.00))));
        assert_eq!(units_with_status(&harness, UnitStatus::Unbilled).await.len(), 1);
    }

    #[tokio::test]
    async fn test_recurring_charge_billed_once_per_period() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        harness
            .store
            .add_recurring_charge(RecurringChargeBuilder::new(vendor).build())
            .await;

        let summary = harness.run().await;
        assert_eq!(summary.sent, 1);
        let invoice = harness.store.invoices().await.remove(0);
        assert_money_eq(invoice.total, dec!(60.00));
        let lines = harness.store.invoice_lines(invoice.id).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].description, "Website hosting");

        let instances = harness
            .store
            .all_units()
            .await
            .into_iter()
            .filter(|u| u.kind() == UnitKind::RecurringCharge)
            .count();
        assert_eq!(instances, 1);
    }

    #[tokio::test]
    async fn test_inactive_recurring_charge_is_never_billed() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        let dormant = VendorId::new();
        for v in [vendor, dormant] {
            harness.store.set_settings(VendorSettingsBuilder::new(v).build()).await;
        }
        harness
            .store
            .add_recurring_charge(RecurringChargeBuilder::new(vendor).build())
            .await;
        harness
            .store
            .add_recurring_charge(
                RecurringChargeBuilder::new(vendor)
                    .with_description("Old retainer")
                    .inactive()
                    .build(),
            )
            .await;
        harness
            .store
            .add_recurring_charge(RecurringChargeBuilder::new(dormant).inactive().build())
            .await;

        let summary = harness.run().await;

        assert!(summary.vendor(dormant).is_none());
        let invoice = harness.store.invoices().await.remove(0);
        let lines = harness.store.invoice_lines(invoice.id).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].description, "Website hosting");
        let instances = harness
            .store
            .all_units()
            .await
            .into_iter()
            .filter(|u| u.kind() == UnitKind::RecurringCharge)
            .count();
        assert_eq!(instances, 1);
    }

    #[tokio::test]
    async fn test_vendor_payment_terms_override_default() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness
            .store
            .set_settings(
                VendorSettingsBuilder::new(vendor)
                    .with_name("The Crown")
                    .with_payment_terms(14)
                    .build(),
            )
            .await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;

        harness.run().await;

        let invoice = harness.store.invoices().await.remove(0);
        assert_eq!(invoice.invoice_date, TemporalFixtures::october_date(1));
        assert_eq!(invoice.due_date, TemporalFixtures::october_date(15));
        let sent = harness.mailer.sent().await;
        assert!(sent[0].body.starts_with("Dear The Crown,"));
        assert!(sent[0].body.contains("Due date: 15 October 2026"));
    }
}

mod rounding {
    use super::*;

    #[tokio::test]
    async fn test_fractional_mileage_stays_within_cap() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        let cap = Money::pounds(dec!(0.12));
        harness
            .store
            .set_settings(VendorSettingsBuilder::new(vendor).capped_at(cap).build())
            .await;
        // 0.1 mi at 0.42 is 0.042, billed as 0.04 per trip
        for day in 1..=3 {
            harness
                .store
                .add_mileage_entry(
                    MileageEntryBuilder::new(vendor)
                        .with_miles(dec!(0.1))
                        .with_date(TemporalFixtures::work_date(day))
                        .build(),
                )
                .await;
        }

        harness.run().await;

        let invoice = harness.store.invoices().await.remove(0);
        assert_money_eq(invoice.total, dec!(0.12));
        assert!(invoice.total <= cap);
        assert!(invoice
            .notes
            .contains(&format!("billed this period: {} inc VAT", invoice.total)));
        let lines = harness.store.invoice_lines(invoice.id).await;
        assert_eq!(lines[0].description, "Mileage: 0.3 miles @ £0.42/mile");
        assert_money_eq(lines[0].subtotal(), dec!(0.12));
        assert_eq!(units_with_status(&harness, UnitStatus::Billed).await.len(), 3);
    }

    #[tokio::test]
    async fn test_per_minute_vat_stays_within_cap() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        let cap = Money::pounds(dec!(0.20));
        harness
            .store
            .set_settings(VendorSettingsBuilder::new(vendor).capped_at(cap).build())
            .await;
        // One minute at 1.20/h is 0.02 net, and 20% of that rounds to nothing
        for day in 1..=10 {
            harness
                .store
                .add_time_entry(
                    TimeEntryBuilder::new(vendor)
                        .with_minutes(1)
                        .with_rate(Money::new(dec!(1.20)))
                        .with_date(TemporalFixtures::work_date(day))
                        .build(),
                )
                .await;
        }

        harness.run().await;

        let invoice = harness.store.invoices().await.remove(0);
        assert_money_eq(invoice.subtotal, dec!(0.20));
        assert_money_eq(invoice.vat_total, dec!(0.00));
        assert_money_eq(invoice.total, dec!(0.20));
        assert!(invoice.total <= cap);
        assert!(invoice
            .notes
            .contains(&format!("billed this period: {} inc VAT", invoice.total)));
        let run = harness.store.run_for(vendor, SEPTEMBER).await.unwrap();
        assert_eq!(run.carried_forward_amount, Some(Money::ZERO));
    }
}

mod liveness {
    use super::*;

    #[tokio::test]
    async fn test_vendor_reached_late_in_batch_is_not_reclaimed() {
        let harness = BillingHarness::with_slow_mailer(Duration::minutes(35));
        let mut vendors = [VendorId::new(), VendorId::new()];
        vendors.sort();
        let [early, late] = vendors;
        for vendor in vendors {
            harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
            harness
                .store
                .add_time_entry(TimeEntryBuilder::new(vendor).build())
                .await;
        }
        // The late vendor's terminal write is lost, leaving its run processing
        harness.store.fail_after(FailPoint::FinishRun, 1).await;
        let start = TemporalFixtures::billing_day();

        let first = harness.run_at(start).await;

        assert_eq!(first.vendor(early).unwrap().status, VendorRunStatus::Sent);
        let run = harness.store.run_for(late, SEPTEMBER).await.unwrap();
        assert_eq!(run.status, RunStatus::Processing);
        assert_eq!(run.created_at, start + Duration::minutes(35));
        assert_eq!(run.updated_at, start + Duration::minutes(35));

        // More September work arrives and a second trigger fires 40 minutes in
        harness
            .store
            .add_time_entry(
                TimeEntryBuilder::new(late)
                    .with_date(TemporalFixtures::work_date(20))
                    .build(),
            )
            .await;
        let second = harness.run_at(start + Duration::minutes(40)).await;

        let result = second.vendor(late).unwrap();
        assert_eq!(result.status, VendorRunStatus::Skipped);
        assert_eq!(result.reason.as_deref(), Some("in_progress"));
        let run = harness.store.run_for(late, SEPTEMBER).await.unwrap();
        assert_eq!(run.attempts, 1);
        assert_eq!(harness.mailer.sent().await.len(), 2);
        assert_eq!(harness.store.invoices().await.len(), 2);
    }
}

mod idempotence {
    use super::*;

    #[tokio::test]
    async fn test_second_invocation_is_a_no_op() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        harness
            .store
            .add_recurring_charge(RecurringChargeBuilder::new(vendor).build())
            .await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;

        let first = harness.run().await;
        assert_eq!(first.sent, 1);

        let second = harness.run().await;
        assert_eq!(second.sent, 0);
        let result = second.vendor(vendor).unwrap();
        assert_eq!(result.status, VendorRunStatus::Skipped);
        assert_eq!(result.reason.as_deref(), Some("already_sent"));
        assert_eq!(result.invoice_id, first.vendor(vendor).unwrap().invoice_id);

        assert_eq!(harness.store.invoices().await.len(), 1);
        assert_eq!(harness.mailer.sent().await.len(), 1);
        let recurring = harness
            .store
            .all_units()
            .await
            .into_iter()
            .filter(|u| u.kind() == UnitKind::RecurringCharge)
            .count();
        assert_eq!(recurring, 1);
    }

    #[tokio::test]
    async fn test_concurrent_invocations_bill_once() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        seed_worked_example(&harness, vendor).await;

        let engine_a = harness.engine.clone();
        let engine_b = harness.engine.clone();
        let now = TemporalFixtures::billing_day();
        let (a, b) = tokio::join!(
            engine_a.run(now, TriggerOptions { force: true }),
            engine_b.run(now, TriggerOptions { force: true }),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());

        assert_eq!(harness.store.invoices().await.len(), 1);
        assert_eq!(harness.mailer.sent().await.len(), 1);
        assert_eq!(harness.store.runs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_billed_units_never_reappear() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        seed_worked_example(&harness, vendor).await;

        harness.run().await;
        let october = harness.run_at(TemporalFixtures::next_billing_day()).await;

        assert!(october.vendor(vendor).is_none());
        assert_eq!(harness.store.invoices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_run_is_left_alone() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;
        let now = TemporalFixtures::billing_day();
        harness
            .store
            .insert_run(BillingRunBuilder::aged(vendor, now, Duration::minutes(5)).build())
            .await;

        let summary = harness.run_at(now).await;

        let result = summary.vendor(vendor).unwrap();
        assert_eq!(result.reason.as_deref(), Some("in_progress"));
        assert!(harness.store.invoices().await.is_empty());
        assert_eq!(units_with_status(&harness, UnitStatus::Unbilled).await.len(), 1);
    }
}

mod recovery {
    use super::*;

    #[tokio::test]
    async fn test_stale_run_releases_and_rebills() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        let now = TemporalFixtures::billing_day();
        let crashed = BillingRunBuilder::aged(vendor, now, Duration::minutes(45)).build();
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).with_hours(2).claimed_by(crashed.id).build())
            .await;
        harness
            .store
            .add_mileage_entry(MileageEntryBuilder::new(vendor).claimed_by(crashed.id).build())
            .await;
        harness.store.insert_run(crashed.clone()).await;

        let summary = harness.run_at(now).await;

        assert_eq!(summary.vendor(vendor).unwrap().status, VendorRunStatus::Sent);
        let run = harness.store.run_for(vendor, SEPTEMBER).await.unwrap();
        assert_eq!(run.id, crashed.id);
        assert_eq!(run.status, RunStatus::Sent);
        assert_eq!(run.attempts, 2);

        let invoice = harness.store.invoices().await.remove(0);
        // 2h at 75.00 + 20% VAT, plus 10 miles at 0.42
        assert_money_eq(invoice.total, dec!(184.20));
        assert_no_pending_units(&harness.store.all_units().await);
        assert_eq!(units_with_status(&harness, UnitStatus::Billed).await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_run_is_retried() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;
        harness.store.fail_once(FailPoint::CreateInvoice).await;

        let first = harness.run().await;
        let result = first.vendor(vendor).unwrap();
        assert_eq!(result.status, VendorRunStatus::Failed);
        assert_eq!(result.failure_kind, Some(FailureKind::Infrastructure));
        let run = harness.store.run_for(vendor, SEPTEMBER).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_message.is_some());
        assert_eq!(units_with_status(&harness, UnitStatus::Unbilled).await.len(), 1);

        let second = harness.run().await;
        assert_eq!(second.vendor(vendor).unwrap().status, VendorRunStatus::Sent);
        let run = harness.store.run_for(vendor, SEPTEMBER).await.unwrap();
        assert_eq!(run.status, RunStatus::Sent);
        assert_eq!(run.error_message, None);
        assert_eq!(harness.store.invoices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_failure_records_failed_run() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;
        harness.store.fail_once(FailPoint::InsertRun).await;

        let summary = harness.run().await;

        assert_eq!(summary.failed, 1);
        let run = harness.store.run_for(vendor, SEPTEMBER).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(harness.store.invoices().await.is_empty());
    }

    #[tokio::test]
    async fn test_unit_load_failure_is_retried() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        seed_worked_example(&harness, vendor).await;
        harness.store.fail_once(FailPoint::LoadUnits).await;

        let first = harness.run().await;

        let result = first.vendor(vendor).unwrap();
        assert_eq!(result.status, VendorRunStatus::Failed);
        assert_eq!(result.failure_kind, Some(FailureKind::Infrastructure));
        assert!(harness.store.invoices().await.is_empty());
        assert_no_pending_units(&harness.store.all_units().await);
        assert_eq!(
            harness.store.run_for(vendor, SEPTEMBER).await.unwrap().status,
            RunStatus::Failed
        );

        let second = harness.run().await;
        assert_eq!(second.vendor(vendor).unwrap().status, VendorRunStatus::Sent);
        assert_eq!(units_with_status(&harness, UnitStatus::Billed).await.len(), 4);
    }

    #[tokio::test]
    async fn test_lost_claim_race_releases_units() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        seed_worked_example(&harness, vendor).await;
        harness.store.fail_once(FailPoint::ClaimRace).await;

        let summary = harness.run().await;

        let result = summary.vendor(vendor).unwrap();
        assert_eq!(result.status, VendorRunStatus::Failed);
        assert_eq!(result.failure_kind, Some(FailureKind::Infrastructure));
        assert!(harness.store.invoices().await.is_empty());

        let run = harness.store.run_for(vendor, SEPTEMBER).await.unwrap();
        let ours: Vec<_> = harness
            .store
            .all_units()
            .await
            .into_iter()
            .filter(|u| u.billing_run_id() == Some(run.id))
            .collect();
        assert!(ours.is_empty());
        // Only the unit taken by the other run stays locked
        assert_eq!(units_with_status(&harness, UnitStatus::BillingPending).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unattached_invoice_is_found_and_resent() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;
        harness.store.fail_once(FailPoint::AttachInvoice).await;

        let first = harness.run().await;
        assert_eq!(first.failed, 1);
        let draft = harness.store.invoices().await.remove(0);
        assert_eq!(draft.status, InvoiceStatus::Draft);
        assert!(harness.mailer.sent().await.is_empty());

        let second = harness.run().await;

        assert_eq!(second.vendor(vendor).unwrap().invoice_id, Some(draft.id));
        assert_eq!(harness.store.invoices().await.len(), 1);
        assert_eq!(harness.mailer.sent().await.len(), 1);
        let run = harness.store.run_for(vendor, SEPTEMBER).await.unwrap();
        assert_eq!(run.invoice_id, Some(draft.id));
        assert_eq!(run.status, RunStatus::Sent);
    }

    #[tokio::test]
    async fn test_unwritten_terminal_state_recovers_once_stale() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;
        harness.store.fail_once(FailPoint::FinishRun).await;

        let first = harness.run().await;
        assert_eq!(first.vendor(vendor).unwrap().status, VendorRunStatus::Failed);
        let run = harness.store.run_for(vendor, SEPTEMBER).await.unwrap();
        assert_eq!(run.status, RunStatus::Processing);

        let later = TemporalFixtures::billing_day() + Duration::minutes(31);
        let second = harness.run_at(later).await;

        let result = second.vendor(vendor).unwrap();
        assert_eq!(result.status, VendorRunStatus::Sent);
        assert_eq!(result.reason.as_deref(), Some("reconciled"));
        assert_eq!(harness.mailer.sent().await.len(), 1);
        let run = harness.store.run_for(vendor, SEPTEMBER).await.unwrap();
        assert_eq!(run.status, RunStatus::Sent);
    }
}

mod lost_replies {
    use super::*;

    #[tokio::test]
    async fn test_invoice_stored_despite_error_is_sent_once() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        seed_worked_example(&harness, vendor).await;
        harness.store.fail_once(FailPoint::CreateInvoiceReplyLost).await;

        let summary = harness.run().await;

        assert_eq!(summary.vendor(vendor).unwrap().status, VendorRunStatus::Sent);
        assert_eq!(harness.store.invoices().await.len(), 1);
        assert_eq!(harness.mailer.sent().await.len(), 1);
        assert_eq!(units_with_status(&harness, UnitStatus::Billed).await.len(), 4);
    }

    #[tokio::test]
    async fn test_released_draft_units_are_relocked_before_resend() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        seed_worked_example(&harness, vendor).await;
        harness.store.fail_once(FailPoint::CreateInvoiceReplyLost).await;
        harness.store.fail_once(FailPoint::FindInvoiceForRun).await;

        let first = harness.run().await;
        assert_eq!(
            first.vendor(vendor).unwrap().failure_kind,
            Some(FailureKind::Infrastructure)
        );
        let draft = harness.store.invoices().await.remove(0);
        assert_eq!(draft.status, InvoiceStatus::Draft);
        assert_eq!(units_with_status(&harness, UnitStatus::Unbilled).await.len(), 4);

        let second = harness.run().await;

        assert_eq!(second.vendor(vendor).unwrap().invoice_id, Some(draft.id));
        assert_eq!(harness.mailer.sent().await.len(), 1);
        for unit in harness.store.all_units().await {
            let unit_ref = unit.unit_ref();
            let stored = harness.store.unit(unit_ref).await;
            assert_unit_status(stored.as_ref(), unit_ref, UnitStatus::Billed);
        }

        let october = harness.run_at(TemporalFixtures::next_billing_day()).await;
        assert!(october.vendor(vendor).is_none());
        assert_eq!(harness.store.invoices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_draft_whose_units_were_taken_needs_review() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        seed_worked_example(&harness, vendor).await;
        harness.store.fail_once(FailPoint::CreateInvoiceReplyLost).await;
        harness.store.fail_once(FailPoint::FindInvoiceForRun).await;
        harness.run().await;
        harness.store.fail_once(FailPoint::ClaimRace).await;

        let summary = harness.run().await;

        let result = summary.vendor(vendor).unwrap();
        assert_eq!(result.status, VendorRunStatus::Failed);
        assert_eq!(result.failure_kind, Some(FailureKind::Policy));
        assert!(result.error.as_deref().unwrap().contains("re-locked 3 of 4"));
        assert!(harness.mailer.sent().await.is_empty());
        assert_eq!(harness.store.invoices().await[0].status, InvoiceStatus::Draft);
        let run = harness.store.run_for(vendor, SEPTEMBER).await.unwrap();
        assert!(harness
            .store
            .all_units()
            .await
            .iter()
            .all(|u| u.billing_run_id() != Some(run.id)));
    }
}

mod reconciliation {
    use super::*;

    #[tokio::test]
    async fn test_lost_sent_status_resends_draft() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        seed_worked_example(&harness, vendor).await;
        harness.store.fail_once(FailPoint::MarkInvoiceSent).await;

        let first = harness.run().await;
        assert_eq!(
            first.vendor(vendor).unwrap().failure_kind,
            Some(FailureKind::Infrastructure)
        );
        let invoice = harness.store.invoices().await.remove(0);
        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(units_with_status(&harness, UnitStatus::BillingPending).await.len(), 4);

        let second = harness.run().await;

        // The vendor receives the same invoice twice
        assert_eq!(second.vendor(vendor).unwrap().status, VendorRunStatus::Sent);
        let sent = harness.mailer.sent().await;
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|email| email.invoice_id == invoice.id));
        assert_eq!(harness.store.invoices().await[0].status, InvoiceStatus::Sent);
        assert_eq!(units_with_status(&harness, UnitStatus::Billed).await.len(), 4);
    }

    #[tokio::test]
    async fn test_draft_is_resent_when_cap_settings_became_invalid() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness
            .store
            .set_settings(
                VendorSettingsBuilder::new(vendor)
                    .capped_at(MoneyFixtures::cap_500())
                    .build(),
            )
            .await;
        seed_worked_example(&harness, vendor).await;
        harness.store.fail_once(FailPoint::MarkInvoiceSent).await;
        harness.run().await;
        harness
            .store
            .set_settings(VendorSettingsBuilder::new(vendor).cap_mode_without_cap().build())
            .await;

        let summary = harness.run().await;

        assert_eq!(summary.vendor(vendor).unwrap().status, VendorRunStatus::Sent);
        let sent = harness.mailer.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].invoice_number, sent[1].invoice_number);
        assert_eq!(harness.store.invoices().await[0].status, InvoiceStatus::Sent);
        assert_eq!(units_with_status(&harness, UnitStatus::BillingPending).await.len(), 0);
    }

    #[tokio::test]
    async fn test_sent_invoice_is_reconciled_without_resend() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        seed_worked_example(&harness, vendor).await;
        harness.store.fail_once(FailPoint::SettleUnits).await;

        let first = harness.run().await;
        assert_eq!(first.failed, 1);
        let invoice = harness.store.invoices().await.remove(0);
        assert_eq!(invoice.status, InvoiceStatus::Sent);
        assert_eq!(units_with_status(&harness, UnitStatus::BillingPending).await.len(), 4);

        let second = harness.run().await;

        let result = second.vendor(vendor).unwrap();
        assert_eq!(result.status, VendorRunStatus::Sent);
        assert_eq!(result.reason.as_deref(), Some("reconciled"));
        assert_eq!(result.invoice_id, Some(invoice.id));
        assert_eq!(harness.mailer.sent().await.len(), 1);
        assert_eq!(units_with_status(&harness, UnitStatus::Billed).await.len(), 4);
        assert_eq!(
            harness.store.run_for(vendor, SEPTEMBER).await.unwrap().status,
            RunStatus::Sent
        );
    }

    #[tokio::test]
    async fn test_paid_invoice_settles_units_as_paid() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;
        harness.store.fail_once(FailPoint::SettleUnits).await;
        harness.run().await;
        let invoice = harness.store.invoices().await.remove(0);
        harness
            .store
            .set_invoice_status(invoice.id, InvoiceStatus::Paid)
            .await;

        harness.run().await;

        assert_eq!(units_with_status(&harness, UnitStatus::Paid).await.len(), 1);
    }

    #[tokio::test]
    async fn test_voided_invoice_is_a_policy_failure() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;
        harness.store.fail_once(FailPoint::SettleUnits).await;
        harness.run().await;
        let invoice = harness.store.invoices().await.remove(0);
        harness
            .store
            .set_invoice_status(invoice.id, InvoiceStatus::Void)
            .await;

        let summary = harness.run().await;

        let result = summary.vendor(vendor).unwrap();
        assert_eq!(result.failure_kind, Some(FailureKind::Policy));
        assert_eq!(harness.mailer.sent().await.len(), 1);
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_cap_below_smallest_unit_is_policy_failure() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness
            .store
            .set_settings(
                VendorSettingsBuilder::new(vendor)
                    .capped_at(Money::pounds(dec!(10)))
                    .build(),
            )
            .await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;

        let summary = harness.run().await;

        let result = summary.vendor(vendor).unwrap();
        assert_eq!(result.status, VendorRunStatus::Failed);
        assert_eq!(result.failure_kind, Some(FailureKind::Policy));
        assert!(result.error.as_deref().unwrap().contains("cap"));
        assert!(harness.store.invoices().await.is_empty());
        assert_eq!(units_with_status(&harness, UnitStatus::Unbilled).await.len(), 1);
    }

    #[tokio::test]
    async fn test_cap_mode_without_cap_is_prerequisite_failure() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness
            .store
            .set_settings(VendorSettingsBuilder::new(vendor).cap_mode_without_cap().build())
            .await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;

        let summary = harness.run().await;

        assert_eq!(
            summary.vendor(vendor).unwrap().failure_kind,
            Some(FailureKind::Prerequisite)
        );
    }

    #[tokio::test]
    async fn test_unconfigured_mailer_keeps_draft_then_redispatches() {
        let harness = BillingHarness::with_mailer(EngineConfig::default(), RecordingMailer::unconfigured());
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        seed_worked_example(&harness, vendor).await;

        let first = harness.run().await;
        let result = first.vendor(vendor).unwrap();
        assert_eq!(result.failure_kind, Some(FailureKind::Prerequisite));
        assert!(result.invoice_number.is_some());
        let draft = harness.store.invoices().await.remove(0);
        assert_eq!(draft.status, InvoiceStatus::Draft);
        assert_eq!(units_with_status(&harness, UnitStatus::BillingPending).await.len(), 4);

        harness.mailer.set_configured(true);
        let second = harness.run().await;

        assert_eq!(second.vendor(vendor).unwrap().status, VendorRunStatus::Sent);
        let invoices = harness.store.invoices().await;
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].id, draft.id);
        assert_eq!(invoices[0].status, InvoiceStatus::Sent);
        assert_eq!(harness.mailer.sent().await.len(), 1);
        assert_eq!(units_with_status(&harness, UnitStatus::Billed).await.len(), 4);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_partial_success() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;
        harness.mailer.fail_next("mailbox unavailable").await;

        let summary = harness.run().await;

        let result = summary.vendor(vendor).unwrap();
        assert_eq!(result.status, VendorRunStatus::Failed);
        assert_eq!(result.failure_kind, Some(FailureKind::PartialSuccess));
        assert_eq!(result.invoice_number.as_deref(), Some("INV-0001"));
        let invoice = harness.store.invoices().await.remove(0);
        assert_eq!(invoice.status, InvoiceStatus::Draft);

        let retry = harness.run().await;
        assert_eq!(retry.vendor(vendor).unwrap().status, VendorRunStatus::Sent);
        assert_eq!(harness.store.invoices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_recipient_is_prerequisite_failure() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness
            .store
            .set_settings(VendorSettingsBuilder::new(vendor).with_invoice_email(None).build())
            .await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;

        let summary = harness.run().await;
        assert_eq!(
            summary.vendor(vendor).unwrap().failure_kind,
            Some(FailureKind::Prerequisite)
        );

        harness
            .store
            .add_contact(ContactBuilder::new(vendor, "owner@anchor.test").primary().build())
            .await;
        harness.run().await;

        let sent = harness.mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients.to, "owner@anchor.test");
    }

    #[tokio::test]
    async fn test_malformed_addresses_are_prerequisite_failure() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness
            .store
            .set_settings(
                VendorSettingsBuilder::new(vendor)
                    .with_invoice_email(Some("accounts at anchor.test"))
                    .build(),
            )
            .await;
        harness
            .store
            .add_contact(
                ContactBuilder::new(vendor, "Owner <owner@anchor.test>")
                    .primary()
                    .build(),
            )
            .await;
        harness
            .store
            .add_contact(
                ContactBuilder::new(vendor, "ops@anchor.test")
                    .without_invoices()
                    .build(),
            )
            .await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;

        let summary = harness.run().await;

        let result = summary.vendor(vendor).unwrap();
        assert_eq!(result.failure_kind, Some(FailureKind::Prerequisite));
        assert!(result.error.as_deref().unwrap().contains("accounts at anchor.test"));
        assert!(harness.mailer.sent().await.is_empty());
        assert_eq!(harness.store.invoices().await[0].status, InvoiceStatus::Draft);

        harness
            .store
            .set_settings(
                VendorSettingsBuilder::new(vendor)
                    .with_invoice_email(Some("accounts@anchor.test"))
                    .build(),
            )
            .await;
        harness.run().await;

        let sent = harness.mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients.to, "accounts@anchor.test");
        assert!(sent[0].recipients.cc.is_empty());
    }

    #[tokio::test]
    async fn test_one_vendor_failing_does_not_stop_the_batch() {
        let harness = BillingHarness::new();
        let capped = VendorId::new();
        let healthy = VendorId::new();
        harness
            .store
            .set_settings(
                VendorSettingsBuilder::new(capped)
                    .capped_at(Money::pounds(dec!(1)))
                    .build(),
            )
            .await;
        harness.store.set_settings(VendorSettingsBuilder::new(healthy).build()).await;
        for vendor in [capped, healthy] {
            harness
                .store
                .add_time_entry(TimeEntryBuilder::new(vendor).build())
                .await;
        }

        let summary = harness.run().await;

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 1);
    }
}

mod trigger {
    use super::*;

    #[tokio::test]
    async fn test_gate_declines_mid_month() {
        let harness = BillingHarness::new();
        let outcome = harness
            .engine
            .run(TemporalFixtures::mid_month(), TriggerOptions::default())
            .await
            .unwrap();

        match outcome {
            BillingRunOutcome::NotScheduled(skip) => {
                assert!(skip.skipped);
                assert_eq!(skip.reason, "not_first_of_month");
                assert_eq!(skip.local_date, TemporalFixtures::october_date(19));
            }
            other => panic!("expected the gate to decline, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gate_opens_on_the_first() {
        let harness = BillingHarness::new();
        let outcome = harness
            .engine
            .run(TemporalFixtures::billing_day(), TriggerOptions::default())
            .await
            .unwrap();

        assert!(matches!(outcome, BillingRunOutcome::Completed(ref s) if s.processed == 0));
    }

    #[tokio::test]
    async fn test_forced_run_bills_previous_month() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        harness
            .store
            .add_time_entry(
                TimeEntryBuilder::new(vendor)
                    .with_date(TemporalFixtures::october_date(5))
                    .build(),
            )
            .await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;

        let summary = harness.run_at(TemporalFixtures::mid_month()).await;

        assert_eq!(summary.period, SEPTEMBER);
        assert_eq!(summary.invoice_date, TemporalFixtures::october_date(19));
        assert_eq!(summary.sent, 1);
        // October work is not yet due
        assert_eq!(units_with_status(&harness, UnitStatus::Unbilled).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_candidate_selection_fails_the_invocation() {
        let harness = BillingHarness::new();
        harness.store.fail_once(FailPoint::CandidateSelection).await;

        let result = harness
            .engine
            .run(TemporalFixtures::billing_day(), TriggerOptions { force: true })
            .await;

        assert!(result.is_err());
    }
}

mod nothing_to_bill {
    use super::*;

    #[tokio::test]
    async fn test_failed_run_with_no_work_is_discarded() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        let now = TemporalFixtures::billing_day();
        harness
            .store
            .insert_run(
                BillingRunBuilder::aged(vendor, now, Duration::hours(2))
                    .with_status(RunStatus::Failed)
                    .with_error("connection reset")
                    .build(),
            )
            .await;

        let summary = harness.run_at(now).await;

        let result = summary.vendor(vendor).unwrap();
        assert_eq!(result.status, VendorRunStatus::Skipped);
        assert_eq!(result.reason.as_deref(), Some("nothing_to_bill"));
        assert!(harness.store.run_for(vendor, SEPTEMBER).await.is_none());
    }
}

mod attachments {
    use super::*;

    #[tokio::test]
    async fn test_long_notes_move_to_timesheet_attachment() {
        let config = EngineConfig {
            notes_char_budget: 120,
            ..EngineConfig::default()
        };
        let harness = BillingHarness::with_config(config);
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        seed_worked_example(&harness, vendor).await;

        harness.run().await;

        let invoice = harness.store.invoices().await.remove(0);
        assert!(invoice.internal_notes.contains(TIMESHEET_ATTACHMENT_MARKER));
        assert!(invoice.needs_timesheet_attachment());

        let sent = harness.mailer.sent().await;
        assert_eq!(sent[0].attachments.len(), 1);
        assert_eq!(sent[0].attachments[0].filename, "timesheet-INV-0001.txt");
    }

    #[tokio::test]
    async fn test_short_notes_stay_on_invoice() {
        let harness = BillingHarness::new();
        let vendor = VendorId::new();
        harness.store.set_settings(VendorSettingsBuilder::new(vendor).build()).await;
        harness
            .store
            .add_time_entry(TimeEntryBuilder::new(vendor).build())
            .await;

        harness.run().await;

        let invoice = harness.store.invoices().await.remove(0);
        assert!(!invoice.needs_timesheet_attachment());
        assert!(invoice.notes.starts_with("Billing period: September 2026"));
        assert!(harness.mailer.sent().await[0].attachments.is_empty());
    }
}
