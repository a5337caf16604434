//! Custom Test Assertions
//!
//! Provides specialized assertion helpers for billing types that give
//! more meaningful error messages than standard assertions.

use core_kernel::Money;
use domain_billing::{Allocation, AllocationPolicy, BillableUnit, UnitRef, UnitStatus};
use rust_decimal::Decimal;

/// Asserts that a Money value equals an amount in pounds
pub fn assert_money_eq(actual: Money, expected: Decimal) {
    assert_eq!(
        actual.amount(),
        expected,
        "Money mismatch: actual={}, expected=£{}",
        actual,
        expected
    );
}

/// Asserts the cap allocation invariants
///
/// Every unit ends up exactly once in either `selected` or `deferred`, the
/// totals match their units, and in cap mode the selected total never
/// exceeds the cap.
pub fn assert_cap_conserved(
    policy: &AllocationPolicy,
    units: &[BillableUnit],
    allocation: &Allocation,
) {
    assert_eq!(
        allocation.selected.len() + allocation.deferred.len(),
        units.len(),
        "Allocation lost or duplicated units: {} selected + {} deferred != {} eligible",
        allocation.selected.len(),
        allocation.deferred.len(),
        units.len()
    );

    for unit in units {
        let unit_ref = unit.unit_ref();
        let placed = allocation
            .selected
            .iter()
            .chain(&allocation.deferred)
            .filter(|u| u.unit_ref() == unit_ref)
            .count();
        assert_eq!(placed, 1, "Unit {:?} placed {} times", unit_ref, placed);
    }

    let selected_total: Money = allocation.selected.iter().map(|u| u.price().inc_vat).sum();
    let deferred_total: Money = allocation.deferred.iter().map(|u| u.price().inc_vat).sum();
    assert_eq!(allocation.selected_total, selected_total, "Selected total drifted");
    assert_eq!(
        allocation.carried_forward_total, deferred_total,
        "Carried-forward total drifted"
    );

    match policy {
        AllocationPolicy::Full => assert!(
            allocation.deferred.is_empty(),
            "Full billing deferred {} units",
            allocation.deferred.len()
        ),
        AllocationPolicy::Cap { cap_inc_vat } => assert!(
            allocation.selected_total <= *cap_inc_vat,
            "Selected total {} exceeds cap {}",
            allocation.selected_total,
            cap_inc_vat
        ),
    }
}

/// Asserts that a unit has the expected billing status
pub fn assert_unit_status(unit: Option<&BillableUnit>, unit_ref: UnitRef, expected: UnitStatus) {
    let unit = unit.unwrap_or_else(|| panic!("Unit {:?} not found", unit_ref));
    assert_eq!(
        unit.status(),
        expected,
        "Unit {:?} has status {}, expected {}",
        unit_ref,
        unit.status(),
        expected
    );
}

/// Asserts that no unit is left locked by a run
pub fn assert_no_pending_units(units: &[BillableUnit]) {
    let pending: Vec<_> = units
        .iter()
        .filter(|u| u.status() == UnitStatus::BillingPending)
        .map(BillableUnit::unit_ref)
        .collect();
    assert!(pending.is_empty(), "Units left billing_pending: {:?}", pending);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::TimeEntryBuilder;
    use core_kernel::VendorId;
    use domain_billing::CapAllocator;
    use rust_decimal_macros::dec;

    #[test]
    fn test_assert_money_eq() {
        assert_money_eq(Money::new(dec!(916.80)), dec!(916.80));
    }

    #[test]
    #[should_panic(expected = "Money mismatch")]
    fn test_assert_money_eq_fails() {
        assert_money_eq(Money::new(dec!(916.80)), dec!(916.81));
    }

    #[test]
    fn test_assert_cap_conserved() {
        let vendor = VendorId::new();
        let units: Vec<_> = (0..3)
            .map(|_| BillableUnit::Time(TimeEntryBuilder::new(vendor).build()))
            .collect();
        let policy = AllocationPolicy::Cap {
            cap_inc_vat: Money::new(dec!(200)),
        };
        let allocation = CapAllocator::allocate(&policy, units.clone()).unwrap();
        assert_cap_conserved(&policy, &units, &allocation);
    }
}
