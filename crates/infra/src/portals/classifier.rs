//! Classification of payment-link failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::PortalError;
use crate::otp::ClassifierError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentErrorClass {
    /// The account hit its monthly purchase cap. Retrying cannot help.
    MonthlyLimitExceeded,
    RateLimited,
    Other { reason: String },
}

#[async_trait]
pub trait PaymentErrorClassifier: Send + Sync {
    async fn classify(&self, error: &PortalError) -> Result<PaymentErrorClass, ClassifierError>;
}

/// Keyword matching over the rejection message.
#[derive(Debug, Clone, Default)]
pub struct KeywordPaymentErrorClassifier;

#[async_trait]
impl PaymentErrorClassifier for KeywordPaymentErrorClassifier {
    async fn classify(&self, error: &PortalError) -> Result<PaymentErrorClass, ClassifierError> {
        let message = error.message();
        let lower = message.to_lowercase();

        if lower.contains("monthly") && lower.contains("limit") {
            return Ok(PaymentErrorClass::MonthlyLimitExceeded);
        }
        let throttled = matches!(error, PortalError::Rejected { status: 429, .. })
            || lower.contains("too many")
            || lower.contains("rate limit");
        if throttled {
            return Ok(PaymentErrorClass::RateLimited);
        }
        Ok(PaymentErrorClass::Other { reason: message })
    }
}
