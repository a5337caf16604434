//! Cap allocation
//!
//! Walks eligible units in priority order and splits them into the units
//! billed this period and the units carried forward. In full mode nothing is
//! deferred. In cap mode a unit is taken only while the VAT-inclusive running
//! total stays within the cap; a unit that does not fit is deferred and the
//! walk continues, so a later, smaller unit can still be billed.

use serde::Serialize;

use core_kernel::Money;

use crate::error::BillingError;
use crate::settings::AllocationPolicy;
use crate::units::BillableUnit;

/// Result of allocating a vendor's eligible units
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Allocation {
    /// Units to invoice now, in allocation order
    pub selected: Vec<BillableUnit>,
    /// Units left for a later period, in allocation order
    pub deferred: Vec<BillableUnit>,
    /// VAT-inclusive total of `selected`
    pub selected_total: Money,
    /// VAT-inclusive total of `deferred`
    pub carried_forward_total: Money,
}

impl Allocation {
    /// Rebuilds an allocation from units already split, e.g. a claimed run
    pub fn from_parts(selected: Vec<BillableUnit>, deferred: Vec<BillableUnit>) -> Self {
        let selected_total = selected.iter().map(|u| u.price().inc_vat).sum();
        let carried_forward_total = deferred.iter().map(|u| u.price().inc_vat).sum();
        Self {
            selected,
            deferred,
            selected_total,
            carried_forward_total,
        }
    }

    /// Value to record on the run; only cap mode carries anything forward
    pub fn carried_forward(&self, policy: &AllocationPolicy) -> Option<Money> {
        match policy {
            AllocationPolicy::Full => None,
            AllocationPolicy::Cap { .. } => Some(self.carried_forward_total),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty() && self.deferred.is_empty()
    }
}

/// Priority ordering plus the cap walk
pub struct CapAllocator;

impl CapAllocator {
    /// Sorts units into allocation priority
    pub fn order(units: &mut [BillableUnit]) {
        units.sort_by_key(BillableUnit::allocation_key);
    }

    /// Allocates `units` under `policy`
    ///
    /// Fails with [`BillingError::CapTooLow`] when eligible units exist but
    /// none fits within the cap.
    pub fn allocate(
        policy: &AllocationPolicy,
        mut units: Vec<BillableUnit>,
    ) -> Result<Allocation, BillingError> {
        Self::order(&mut units);

        let mut allocation = Allocation::default();
        for unit in units {
            let inc_vat = unit.price().inc_vat;
            let fits = match policy {
                AllocationPolicy::Full => true,
                AllocationPolicy::Cap { cap_inc_vat } => {
                    allocation.selected_total + inc_vat <= *cap_inc_vat
                }
            };

            if fits {
                allocation.selected_total += inc_vat;
                allocation.selected.push(unit);
            } else {
                allocation.carried_forward_total += inc_vat;
                allocation.deferred.push(unit);
            }
        }

        if let AllocationPolicy::Cap { cap_inc_vat } = policy {
            if allocation.selected.is_empty() && !allocation.deferred.is_empty() {
                let smallest_unit = allocation
                    .deferred
                    .iter()
                    .map(|unit| unit.price().inc_vat)
                    .min()
                    .unwrap_or_default();
                return Err(BillingError::CapTooLow {
                    cap: *cap_inc_vat,
                    eligible_units: allocation.deferred.len(),
                    smallest_unit,
                });
            }
        }

        Ok(allocation)
    }
}
