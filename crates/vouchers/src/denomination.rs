//! Denominations and inventory snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use voucherflow_core::{Contract, ContractViolation};

use crate::plan::PurchasePlan;

/// One purchasable voucher value as listed by the marketplace.
///
/// Fetched fresh for every inventory check; availability changes externally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherDenomination {
    /// Face value in whole currency units.
    pub amount: u32,
    pub available_qty: u32,
    /// Opaque identifier the marketplace expects in cart calls.
    pub catalog_id: String,
}

impl Contract for VoucherDenomination {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.amount == 0 {
            return Err(ContractViolation::new("voucher_denomination", "amount must be positive"));
        }
        ContractViolation::require_non_blank("voucher_denomination", "catalog_id", &self.catalog_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLine {
    pub available_qty: u32,
    pub catalog_id: String,
}

/// Inventory keyed by denomination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    lines: BTreeMap<u32, InventoryLine>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a marketplace listing. Repeated denominations are summed
    /// (the first catalog id wins).
    pub fn from_listing<'a>(listing: impl IntoIterator<Item = &'a VoucherDenomination>) -> Self {
        let mut inventory = Self::new();
        for d in listing {
            inventory
                .lines
                .entry(d.amount)
                .and_modify(|line| line.available_qty = line.available_qty.saturating_add(d.available_qty))
                .or_insert_with(|| InventoryLine {
                    available_qty: d.available_qty,
                    catalog_id: d.catalog_id.clone(),
                });
        }
        inventory
    }

    /// Build from `(denomination, available_qty)` pairs with synthetic catalog ids.
    pub fn from_counts(counts: impl IntoIterator<Item = (u32, u32)>) -> Self {
        let mut inventory = Self::new();
        for (amount, qty) in counts {
            inventory.lines.insert(
                amount,
                InventoryLine {
                    available_qty: qty,
                    catalog_id: format!("denom-{amount}"),
                },
            );
        }
        inventory
    }

    pub fn available(&self, denomination: u32) -> u32 {
        self.lines.get(&denomination).map_or(0, |l| l.available_qty)
    }

    pub fn line(&self, denomination: u32) -> Option<&InventoryLine> {
        self.lines.get(&denomination)
    }

    /// Remove what `plan` consumes. Quantities never go below zero.
    pub fn deduct(&mut self, plan: &PurchasePlan) {
        for line in plan.lines() {
            if let Some(entry) = self.lines.get_mut(&line.denomination) {
                entry.available_qty = entry.available_qty.saturating_sub(line.quantity);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.values().all(|l| l.available_qty == 0)
    }
}
