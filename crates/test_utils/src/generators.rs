//! Property-Based Test Generators
//!
//! Provides proptest strategies for generating billable units and caps that
//! respect the domain's invariants.

use core_kernel::{Money, RecurringChargeInstanceId, VatRate, VendorId};
use domain_billing::{
    AllocationPolicy, BillableUnit, RecurringCharge, RecurringChargeInstance, UnitStatus,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

use crate::builders::{MileageEntryBuilder, RecurringChargeBuilder, TimeEntryBuilder};
use crate::fixtures::TemporalFixtures;

/// Strategy for Money amounts in whole pence
pub fn pence_strategy(max_pence: i64) -> impl Strategy<Value = Money> {
    (0i64..=max_pence).prop_map(Money::from_pence)
}

/// Strategy for the VAT rates seen in practice
pub fn vat_rate_strategy() -> impl Strategy<Value = VatRate> {
    prop_oneof![
        Just(VatRate::ZERO),
        Just(VatRate::percent(Decimal::from(5))),
        Just(VatRate::standard()),
    ]
}

/// Strategy for a day within September 2026
pub fn september_day_strategy() -> impl Strategy<Value = u32> {
    1u32..=30u32
}

/// Strategy for a single billable unit of any kind
pub fn billable_unit_strategy(vendor_id: VendorId) -> impl Strategy<Value = BillableUnit> {
    prop_oneof![
        (1u32..=600u32, 1i64..=15_000i64, vat_rate_strategy(), september_day_strategy()).prop_map(
            move |(minutes, rate_pence, vat, day)| {
                BillableUnit::Time(
                    TimeEntryBuilder::new(vendor_id)
                        .with_minutes(minutes)
                        .with_rate(Money::from_pence(rate_pence))
                        .with_vat(vat)
                        .with_date(TemporalFixtures::work_date(day))
                        .build(),
                )
            }
        ),
        (1i64..=5_000i64, september_day_strategy()).prop_map(move |(tenths, day)| {
            BillableUnit::Mileage(
                MileageEntryBuilder::new(vendor_id)
                    .with_miles(Decimal::new(tenths, 1))
                    .with_date(TemporalFixtures::work_date(day))
                    .build(),
            )
        }),
        (1i64..=50_000i64, vat_rate_strategy(), 0i32..5i32).prop_map(
            move |(pence, vat, sort_order)| {
                let charge: RecurringCharge = RecurringChargeBuilder::new(vendor_id)
                    .with_amount(Money::from_pence(pence))
                    .with_vat(vat)
                    .with_sort_order(sort_order)
                    .build();
                let new = charge.instantiate(&TemporalFixtures::september_2026());
                BillableUnit::RecurringCharge(RecurringChargeInstance {
                    id: RecurringChargeInstanceId::new(),
                    vendor_id: new.vendor_id,
                    recurring_charge_id: new.recurring_charge_id,
                    period_key: new.period_key,
                    period_start: new.period_start,
                    period_end: new.period_end,
                    description: new.description,
                    amount_ex_vat: new.amount_ex_vat,
                    vat_rate: new.vat_rate,
                    sort_order: new.sort_order,
                    status: UnitStatus::Unbilled,
                    billing_run_id: None,
                    invoice_id: None,
                    created_at: TemporalFixtures::created_at(),
                })
            }
        ),
    ]
}

/// Strategy for a vendor's eligible units
pub fn unit_set_strategy(max_units: usize) -> impl Strategy<Value = Vec<BillableUnit>> {
    let vendor_id = VendorId::new();
    prop::collection::vec(billable_unit_strategy(vendor_id), 0..=max_units)
}

/// Strategy for an allocation policy; caps range from £0.01 to £2,000
pub fn allocation_policy_strategy() -> impl Strategy<Value = AllocationPolicy> {
    prop_oneof![
        1 => Just(AllocationPolicy::Full),
        3 => (1i64..=200_000i64).prop_map(|pence| AllocationPolicy::Cap {
            cap_inc_vat: Money::from_pence(pence),
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_generated_units_are_unbilled(units in unit_set_strategy(10)) {
            for unit in &units {
                prop_assert_eq!(unit.status(), UnitStatus::Unbilled);
                prop_assert!(!unit.price().inc_vat.is_negative());
            }
        }

        #[test]
        fn test_generated_caps_are_positive(policy in allocation_policy_strategy()) {
            if let AllocationPolicy::Cap { cap_inc_vat } = policy {
                prop_assert!(cap_inc_vat.is_positive());
            }
        }
    }
}
