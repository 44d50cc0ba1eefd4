//! OTP text classification.
//!
//! A classifier reads one message body and reports which portal and purpose
//! it belongs to together with the code it carries. It must answer "no match"
//! rather than guess.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use voucherflow_core::{OtpPurpose, Portal};

/// The (portal, purpose) a caller is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OtpTarget {
    pub portal: Portal,
    pub purpose: OtpPurpose,
}

impl OtpTarget {
    pub fn new(portal: Portal, purpose: OtpPurpose) -> Self {
        Self { portal, purpose }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedOtp {
    pub target: OtpTarget,
    pub code: String,
}

#[async_trait]
pub trait OtpClassifier: Send + Sync {
    async fn classify(&self, text: &str, target: OtpTarget) -> Result<Option<ClassifiedOtp>, ClassifierError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
}

/// Keyword rules plus a digit-run extractor.
///
/// The first rule whose keyword occurs in the lowercased text decides the
/// message's portal and purpose. The code is the first run of 4 to 8 digits.
#[derive(Debug, Clone)]
pub struct KeywordOtpClassifier {
    rules: Vec<(String, OtpTarget)>,
}

impl KeywordOtpClassifier {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rule(mut self, keyword: &str, portal: Portal, purpose: OtpPurpose) -> Self {
        self.rules
            .push((keyword.to_lowercase(), OtpTarget::new(portal, purpose)));
        self
    }

    fn target_of(&self, text: &str) -> Option<OtpTarget> {
        let lower = text.to_lowercase();
        self.rules
            .iter()
            .find(|(keyword, _)| lower.contains(keyword.as_str()))
            .map(|(_, target)| *target)
    }
}

impl Default for KeywordOtpClassifier {
    fn default() -> Self {
        Self::new()
            .rule("payment", Portal::VoucherMarketplace, OtpPurpose::PaymentConfirmation)
            .rule("transaction", Portal::VoucherMarketplace, OtpPurpose::Transaction)
            .rule("rewards", Portal::RewardsMultiplier, OtpPurpose::Login)
            .rule("voucher", Portal::VoucherMarketplace, OtpPurpose::Login)
            .rule("amazon", Portal::RedemptionTarget, OtpPurpose::Login)
    }
}

#[async_trait]
impl OtpClassifier for KeywordOtpClassifier {
    async fn classify(&self, text: &str, target: OtpTarget) -> Result<Option<ClassifiedOtp>, ClassifierError> {
        let Some(found) = self.target_of(text) else {
            return Ok(None);
        };
        if found != target {
            return Ok(None);
        }
        Ok(extract_code(text).map(|code| ClassifiedOtp { target: found, code }))
    }
}

/// First standalone run of 4 to 8 ASCII digits.
pub fn extract_code(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_ascii_digit())
        .find(|run| (4..=8).contains(&run.len()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login(portal: Portal) -> OtpTarget {
        OtpTarget::new(portal, OtpPurpose::Login)
    }

    #[test]
    fn extracts_first_plausible_digit_run() {
        assert_eq!(extract_code("Your OTP is 482913. Do not share."), Some("482913".into()));
        assert_eq!(extract_code("Ref 12, code 5521 valid 10 min"), Some("5521".into()));
        assert_eq!(extract_code("call 1800123456789 now"), None);
        assert_eq!(extract_code("no digits"), None);
    }

    #[tokio::test]
    async fn matches_only_the_requested_target() {
        let classifier = KeywordOtpClassifier::default();
        let text = "482913 is your Rewards Multiplier login OTP";

        let hit = classifier
            .classify(text, login(Portal::RewardsMultiplier))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.code, "482913");
        assert_eq!(hit.target, login(Portal::RewardsMultiplier));

        let miss = classifier.classify(text, login(Portal::RedemptionTarget)).await.unwrap();
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn unknown_messages_are_not_guessed() {
        let classifier = KeywordOtpClassifier::default();
        let miss = classifier
            .classify("Your code is 123456", login(Portal::RewardsMultiplier))
            .await
            .unwrap();
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn payment_keyword_wins_over_portal_keyword() {
        let classifier = KeywordOtpClassifier::default();
        let target = OtpTarget::new(Portal::VoucherMarketplace, OtpPurpose::PaymentConfirmation);
        let hit = classifier
            .classify("Use 7788 to confirm your voucher payment", target)
            .await
            .unwrap();
        assert_eq!(hit.map(|h| h.code), Some("7788".into()));
    }
}
