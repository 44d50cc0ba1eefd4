//! Named workflow events and their payloads.

use serde::{Deserialize, Serialize};

use voucherflow_core::{Amount, JobId, Quantity};

use crate::envelope::EventEnvelope;

/// Payload of `bulk-purchase/initiate`.
///
/// `amount` and `quantity` are validated while decoding, so a handler never
/// sees an out-of-range request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatePurchase {
    pub job_id: JobId,
    pub amount: Amount,
    pub quantity: Quantity,
}

/// Every event the orchestrator consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data")]
pub enum WorkflowEvent {
    #[serde(rename = "bulk-purchase/initiate")]
    BulkPurchaseInitiate(InitiatePurchase),
}

impl WorkflowEvent {
    pub const BULK_PURCHASE_INITIATE: &'static str = "bulk-purchase/initiate";

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::BulkPurchaseInitiate(_) => Self::BULK_PURCHASE_INITIATE,
        }
    }

    /// Wrap in an envelope routed by this event's name.
    pub fn into_envelope(self) -> EventEnvelope<WorkflowEvent> {
        EventEnvelope::new(self.name(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_uses_event_name() {
        let event = WorkflowEvent::BulkPurchaseInitiate(InitiatePurchase {
            job_id: JobId::new(),
            amount: Amount::new(1000).unwrap(),
            quantity: Quantity::new(2).unwrap(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["name"], "bulk-purchase/initiate");
        assert_eq!(json["data"]["amount"], 1000);
        assert_eq!(json["data"]["quantity"], 2);
    }

    #[test]
    fn decoding_rejects_unsupported_amount() {
        let json = serde_json::json!({
            "name": "bulk-purchase/initiate",
            "data": { "job_id": JobId::new(), "amount": 1200, "quantity": 1 }
        });
        assert!(serde_json::from_value::<WorkflowEvent>(json).is_err());
    }

    #[test]
    fn envelope_is_named_after_event() {
        let env = WorkflowEvent::BulkPurchaseInitiate(InitiatePurchase {
            job_id: JobId::new(),
            amount: Amount::new(1500).unwrap(),
            quantity: Quantity::new(1).unwrap(),
        })
        .into_envelope();
        assert_eq!(env.name(), WorkflowEvent::BULK_PURCHASE_INITIATE);
    }
}
