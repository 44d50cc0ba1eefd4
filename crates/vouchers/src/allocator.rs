//! Voucher allocator.
//!
//! Every supported amount has a fixed candidate table, ordered from fewest and
//! largest vouchers to most and smallest. The first candidate the inventory can
//! satisfy wins, which makes the choice deterministic and pins tie-breaking to
//! declaration order.

use thiserror::Error;

use crate::denomination::Inventory;
use crate::plan::{PlanLine, PurchasePlan};

type Candidate = &'static [(u32, u32)];

const CANDIDATES_1000: &[Candidate] = &[&[(1000, 1)], &[(500, 2)], &[(250, 4)]];

const CANDIDATES_1500: &[Candidate] = &[&[(1000, 1), (500, 1)], &[(500, 3)], &[(250, 6)]];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("amount {0} is not supported")]
    UnsupportedAmount(u32),

    /// `unit` is the 1-based purchase unit that could not be covered.
    #[error("inventory exhausted: no candidate covers {amount} for unit {unit}")]
    InventoryExhausted { amount: u32, unit: u32 },
}

/// Candidate allocations for `amount`, in priority order.
pub fn candidates(amount: u32) -> Option<&'static [Candidate]> {
    match amount {
        1000 => Some(CANDIDATES_1000),
        1500 => Some(CANDIDATES_1500),
        _ => None,
    }
}

/// Smallest-count plan for a single unit of `amount`.
pub fn allocate(amount: u32, inventory: &Inventory) -> Result<PurchasePlan, AllocationError> {
    allocate_unit(amount, 1, inventory)
}

/// Plans for `units` purchase units, each allocated against what the previous
/// units left over.
pub fn allocate_units(
    amount: u32,
    units: u32,
    inventory: &Inventory,
) -> Result<Vec<PurchasePlan>, AllocationError> {
    let mut remaining = inventory.clone();
    let mut plans = Vec::with_capacity(units as usize);
    for unit in 1..=units {
        let plan = allocate_unit(amount, unit, &remaining)?;
        remaining.deduct(&plan);
        plans.push(plan);
    }
    Ok(plans)
}

fn allocate_unit(amount: u32, unit: u32, inventory: &Inventory) -> Result<PurchasePlan, AllocationError> {
    let table = candidates(amount).ok_or(AllocationError::UnsupportedAmount(amount))?;

    table
        .iter()
        .find_map(|candidate| try_candidate(amount, candidate, inventory))
        .ok_or(AllocationError::InventoryExhausted { amount, unit })
}

fn try_candidate(amount: u32, candidate: &[(u32, u32)], inventory: &Inventory) -> Option<PurchasePlan> {
    let mut lines = Vec::with_capacity(candidate.len());
    for &(denomination, quantity) in candidate {
        let line = inventory.line(denomination)?;
        if line.available_qty < quantity {
            return None;
        }
        lines.push(PlanLine {
            denomination,
            quantity,
            catalog_id: line.catalog_id.clone(),
        });
    }
    Some(PurchasePlan::new(amount, lines))
}

#[cfg(test)]
mod tests {
    use super::*;
    use voucherflow_core::Contract;

    #[test]
    fn thousand_prefers_single_voucher() {
        let inv = Inventory::from_counts([(1000, 3), (500, 10), (250, 10)]);
        let plan = allocate(1000, &inv).unwrap();
        assert_eq!(plan.pairs(), vec![(1000, 1)]);
        assert_eq!(plan.lines()[0].catalog_id, "denom-1000");
    }

    #[test]
    fn thousand_falls_through_to_quarters() {
        let inv = Inventory::from_counts([(1000, 0), (500, 1), (250, 10)]);
        let plan = allocate(1000, &inv).unwrap();
        assert_eq!(plan.pairs(), vec![(250, 4)]);
    }

    #[test]
    fn fifteen_hundred_mixes_denominations() {
        let inv = Inventory::from_counts([(1000, 1), (500, 1), (250, 0)]);
        let plan = allocate(1500, &inv).unwrap();
        assert_eq!(plan.pairs(), vec![(1000, 1), (500, 1)]);
    }

    #[test]
    fn fifteen_hundred_uses_three_halves_without_thousands() {
        let inv = Inventory::from_counts([(500, 3), (250, 6)]);
        assert_eq!(allocate(1500, &inv).unwrap().pairs(), vec![(500, 3)]);
    }

    #[test]
    fn unsupported_amount_is_rejected_before_inventory() {
        let inv = Inventory::from_counts([(1000, 5)]);
        assert_eq!(allocate(2000, &inv), Err(AllocationError::UnsupportedAmount(2000)));
    }

    #[test]
    fn exhausted_inventory_reports_unit() {
        let inv = Inventory::from_counts([(1000, 0), (500, 1), (250, 3)]);
        assert_eq!(
            allocate(1000, &inv),
            Err(AllocationError::InventoryExhausted { amount: 1000, unit: 1 })
        );
    }

    #[test]
    fn units_consume_inventory_in_order() {
        let inv = Inventory::from_counts([(1000, 1), (500, 2), (250, 4)]);
        let plans = allocate_units(1000, 3, &inv).unwrap();
        let pairs: Vec<_> = plans.iter().map(|p| p.pairs()).collect();
        assert_eq!(pairs, vec![vec![(1000, 1)], vec![(500, 2)], vec![(250, 4)]]);

        let err = allocate_units(1000, 4, &inv).unwrap_err();
        assert_eq!(err, AllocationError::InventoryExhausted { amount: 1000, unit: 4 });
    }

    #[test]
    fn allocated_plans_satisfy_contract() {
        let inv = Inventory::from_counts([(1000, 1), (500, 1)]);
        let plan = allocate(1500, &inv).unwrap();
        assert!(plan.validate().is_ok());
        assert_eq!(plan.total(), 1500);
        assert_eq!(plan.voucher_count(), 2);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn inventory_strategy() -> impl Strategy<Value = Inventory> {
            (0u32..4, 0u32..6, 0u32..12)
                .prop_map(|(k, h, q)| Inventory::from_counts([(1000, k), (500, h), (250, q)]))
        }

        fn feasible(candidate: &[(u32, u32)], inv: &Inventory) -> bool {
            candidate.iter().all(|&(d, q)| inv.available(d) >= q)
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: the first feasible candidate in declared order is returned.
            #[test]
            fn returns_first_feasible_candidate(
                amount in prop::sample::select(vec![1000u32, 1500]),
                inv in inventory_strategy(),
            ) {
                let table = candidates(amount).unwrap();
                let expected = table.iter().find(|c| feasible(c, &inv));

                match (allocate(amount, &inv), expected) {
                    (Ok(plan), Some(candidate)) => {
                        prop_assert_eq!(plan.pairs(), candidate.to_vec());
                        prop_assert_eq!(plan.total(), amount);
                    }
                    (Err(AllocationError::InventoryExhausted { .. }), None) => {}
                    (got, want) => prop_assert!(false, "got {:?}, expected {:?}", got, want),
                }
            }

            /// Property: allocation is deterministic.
            #[test]
            fn allocation_is_deterministic(
                amount in prop::sample::select(vec![1000u32, 1500]),
                inv in inventory_strategy(),
            ) {
                prop_assert_eq!(allocate(amount, &inv), allocate(amount, &inv));
            }

            /// Property: multi-unit plans never consume more than is available.
            #[test]
            fn units_never_oversubscribe(
                amount in prop::sample::select(vec![1000u32, 1500]),
                units in 1u32..6,
                inv in inventory_strategy(),
            ) {
                if let Ok(plans) = allocate_units(amount, units, &inv) {
                    prop_assert_eq!(plans.len() as u32, units);
                    for d in [1000u32, 500, 250] {
                        let used: u32 = plans
                            .iter()
                            .flat_map(|p| p.lines())
                            .filter(|l| l.denomination == d)
                            .map(|l| l.quantity)
                            .sum();
                        prop_assert!(used <= inv.available(d));
                    }
                }
            }
        }
    }
}
