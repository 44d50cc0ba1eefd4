//! Workflow stages, for logs and reports.

use serde::{Deserialize, Serialize};

/// `Pending → InventoryChecked → Authenticated → PaymentLinksGenerated →
/// Purchasing(1..=quantity) → Completed`, with `Failed` reachable from any
/// stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum WorkflowStage {
    Pending,
    InventoryChecked,
    Authenticated,
    PaymentLinksGenerated,
    Purchasing { unit: u32 },
    Completed,
    Failed,
}

impl core::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WorkflowStage::Pending => f.write_str("pending"),
            WorkflowStage::InventoryChecked => f.write_str("inventory_checked"),
            WorkflowStage::Authenticated => f.write_str("authenticated"),
            WorkflowStage::PaymentLinksGenerated => f.write_str("payment_links_generated"),
            WorkflowStage::Purchasing { unit } => write!(f, "purchasing({unit})"),
            WorkflowStage::Completed => f.write_str("completed"),
            WorkflowStage::Failed => f.write_str("failed"),
        }
    }
}
