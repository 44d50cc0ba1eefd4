//! Purchase plans.

use serde::{Deserialize, Serialize};

use voucherflow_core::{Contract, ContractViolation};

/// One `(denomination, quantity)` entry of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLine {
    pub denomination: u32,
    pub quantity: u32,
    pub catalog_id: String,
}

impl PlanLine {
    pub fn subtotal(&self) -> u32 {
        self.denomination * self.quantity
    }
}

/// Ordered list of denomination purchases summing to `target`.
///
/// Computed once per purchase unit and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasePlan {
    target: u32,
    lines: Vec<PlanLine>,
}

impl PurchasePlan {
    pub(crate) fn new(target: u32, lines: Vec<PlanLine>) -> Self {
        Self { target, lines }
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn lines(&self) -> &[PlanLine] {
        &self.lines
    }

    pub fn total(&self) -> u32 {
        self.lines.iter().map(PlanLine::subtotal).sum()
    }

    /// Total number of vouchers bought by this plan.
    pub fn voucher_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// `(denomination, quantity)` pairs, in plan order.
    pub fn pairs(&self) -> Vec<(u32, u32)> {
        self.lines.iter().map(|l| (l.denomination, l.quantity)).collect()
    }
}

impl Contract for PurchasePlan {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.lines.is_empty() {
            return Err(ContractViolation::new("purchase_plan", "plan has no lines"));
        }
        for line in &self.lines {
            if line.quantity == 0 {
                return Err(ContractViolation::new("purchase_plan", "line quantity must be positive"));
            }
            ContractViolation::require_non_blank("purchase_plan", "catalog_id", &line.catalog_id)?;
        }
        if self.total() != self.target {
            return Err(ContractViolation::new(
                "purchase_plan",
                format!("lines sum to {} but target is {}", self.total(), self.target),
            ));
        }
        Ok(())
    }
}
