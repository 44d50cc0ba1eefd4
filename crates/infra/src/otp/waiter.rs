//! Bounded polling for an OTP that arrives out of band.
//!
//! `Polling(1..=max) -> Found | Exhausted`. Each attempt reads the messages
//! from the sender received since the request's start time, newest first,
//! and asks the classifier about each one. A classification is accepted only
//! when its portal and purpose equal the requested ones. Codes the caller
//! already tried can be excluded, so a rejected code is never handed out again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use voucherflow_core::{Contract, ContractViolation, OtpPurpose, Portal};

use super::classifier::{OtpClassifier, OtpTarget};
use super::message_store::{MessageStore, MessageStoreError};
use crate::steps::RetryPolicy;

/// Correlation key of one wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpRequest {
    pub sender: String,
    pub portal: Portal,
    pub purpose: OtpPurpose,
    pub since: DateTime<Utc>,
}

impl OtpRequest {
    pub fn target(&self) -> OtpTarget {
        OtpTarget::new(self.portal, self.purpose)
    }
}

impl Contract for OtpRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        ContractViolation::require_non_blank("otp request", "sender", &self.sender)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpResult {
    pub code: String,
    /// Body of the message the code came from.
    pub message: String,
    pub received_at: DateTime<Utc>,
    pub portal: Portal,
    pub purpose: OtpPurpose,
}

impl Contract for OtpResult {
    fn validate(&self) -> Result<(), ContractViolation> {
        ContractViolation::require_non_blank("otp result", "code", &self.code)?;
        if !self.code.chars().all(|c| c.is_ascii_digit()) {
            return Err(ContractViolation::new("otp result", "code must be numeric"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpOutcome {
    Found(OtpResult),
    /// No matching message after every attempt. The caller may wait again.
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum OtpError {
    #[error("message store: {0}")]
    Store(#[from] MessageStoreError),
    #[error("invalid otp request: {0}")]
    Contract(#[from] ContractViolation),
}

pub struct OtpWaiter {
    messages: Arc<dyn MessageStore>,
    classifier: Arc<dyn OtpClassifier>,
    policy: RetryPolicy,
}

impl OtpWaiter {
    /// Five attempts, exponential from 1s, capped at 30s.
    pub fn new(messages: Arc<dyn MessageStore>, classifier: Arc<dyn OtpClassifier>) -> Self {
        Self {
            messages,
            classifier,
            policy: RetryPolicy::exponential(5, Duration::from_secs(1), Duration::from_secs(30)),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Poll until a code is found or the attempts run out. There is no sleep
    /// after the last attempt.
    pub async fn wait(&self, request: &OtpRequest) -> Result<OtpOutcome, OtpError> {
        self.wait_excluding(request, &[]).await
    }

    /// Like [`wait`](Self::wait), skipping messages whose code is in `tried`.
    pub async fn wait_excluding(&self, request: &OtpRequest, tried: &[String]) -> Result<OtpOutcome, OtpError> {
        request.validate()?;
        let max = self.policy.max_attempts.max(1);

        for attempt in 1..=max {
            if let Some(result) = self.poll_excluding(request, tried).await? {
                info!(
                    portal = %request.portal,
                    purpose = %request.purpose,
                    attempt,
                    "otp found"
                );
                return Ok(OtpOutcome::Found(result));
            }
            if attempt < max {
                let delay = self.policy.delay_for_attempt(attempt);
                debug!(
                    portal = %request.portal,
                    purpose = %request.purpose,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "otp not found yet"
                );
                tokio::time::sleep(delay).await;
            }
        }

        warn!(portal = %request.portal, purpose = %request.purpose, attempts = max, "otp wait exhausted");
        Ok(OtpOutcome::Exhausted { attempts: max })
    }

    /// One pass over the current messages.
    pub async fn poll(&self, request: &OtpRequest) -> Result<Option<OtpResult>, OtpError> {
        self.poll_excluding(request, &[]).await
    }

    pub async fn poll_excluding(&self, request: &OtpRequest, tried: &[String]) -> Result<Option<OtpResult>, OtpError> {
        let target = request.target();
        let messages = self.messages.find_since(&request.sender, request.since).await?;

        for message in messages {
            let Some(text) = message.text() else {
                continue;
            };
            let classified = match self.classifier.classify(text, target).await {
                Ok(Some(classified)) => classified,
                Ok(None) => continue,
                Err(e) => {
                    warn!(message_id = message.id, error = %e, "otp classification failed");
                    continue;
                }
            };
            if classified.target != target {
                debug!(message_id = message.id, "classifier answered for another target");
                continue;
            }
            if tried.contains(&classified.code) {
                debug!(message_id = message.id, "skipping an otp that was already tried");
                continue;
            }

            let result = OtpResult {
                code: classified.code,
                message: text.to_string(),
                received_at: message.created_at,
                portal: request.portal,
                purpose: request.purpose,
            };
            if result.validate().is_ok() {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::classifier::{ClassifiedOtp, ClassifierError, KeywordOtpClassifier};
    use crate::otp::message_store::{InMemoryMessageStore, InboundMessage};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingStore {
        inner: InMemoryMessageStore,
        reads: AtomicU32,
    }

    #[async_trait]
    impl MessageStore for CountingStore {
        async fn append(&self, sender: &str, raw: serde_json::Value) -> Result<InboundMessage, MessageStoreError> {
            self.inner.append(sender, raw).await
        }

        async fn find_since(
            &self,
            sender: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<InboundMessage>, MessageStoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.find_since(sender, since).await
        }
    }

    /// Claims every message is a marketplace login OTP.
    struct LyingClassifier;

    #[async_trait]
    impl OtpClassifier for LyingClassifier {
        async fn classify(&self, _text: &str, _target: OtpTarget) -> Result<Option<ClassifiedOtp>, ClassifierError> {
            Ok(Some(ClassifiedOtp {
                target: OtpTarget::new(Portal::VoucherMarketplace, OtpPurpose::Login),
                code: "999999".into(),
            }))
        }
    }

    fn request(since: DateTime<Utc>) -> OtpRequest {
        OtpRequest {
            sender: "+911234".into(),
            portal: Portal::RewardsMultiplier,
            purpose: OtpPurpose::Login,
            since,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts_within_backoff_budget() {
        let store = Arc::new(CountingStore {
            inner: InMemoryMessageStore::new(),
            reads: AtomicU32::new(0),
        });
        let waiter = OtpWaiter::new(store.clone(), Arc::new(KeywordOtpClassifier::default()));
        let started = tokio::time::Instant::now();

        let outcome = waiter.wait(&request(Utc::now())).await.unwrap();

        assert_eq!(outcome, OtpOutcome::Exhausted { attempts: 5 });
        assert_eq!(store.reads.load(Ordering::SeqCst), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(1 + 2 + 4 + 8));
        assert!(started.elapsed() <= waiter.policy().total_backoff());
    }

    #[tokio::test(start_paused = true)]
    async fn finds_newest_matching_code() {
        let store = Arc::new(InMemoryMessageStore::new());
        let since = Utc::now();
        store
            .insert_at("+911234", json!({ "message": "111111 is your Rewards login OTP" }), since)
            .unwrap();
        store
            .insert_at(
                "+911234",
                json!({ "text": "222222 is your Rewards login OTP" }),
                since + chrono::Duration::seconds(1),
            )
            .unwrap();
        let waiter = OtpWaiter::new(store, Arc::new(KeywordOtpClassifier::default()));

        let OtpOutcome::Found(result) = waiter.wait(&request(since)).await.unwrap() else {
            panic!("expected a code");
        };
        assert_eq!(result.code, "222222");
        assert_eq!(result.portal, Portal::RewardsMultiplier);
        assert_eq!(result.purpose, OtpPurpose::Login);
    }

    #[tokio::test(start_paused = true)]
    async fn ignores_messages_before_the_window() {
        let store = Arc::new(InMemoryMessageStore::new());
        let since = Utc::now();
        store
            .insert_at(
                "+911234",
                json!({ "message": "111111 is your Rewards login OTP" }),
                since - chrono::Duration::seconds(30),
            )
            .unwrap();
        let waiter = OtpWaiter::new(store, Arc::new(KeywordOtpClassifier::default()))
            .with_policy(RetryPolicy::exponential(2, Duration::from_secs(1), Duration::from_secs(30)));

        let outcome = waiter.wait(&request(since)).await.unwrap();
        assert_eq!(outcome, OtpOutcome::Exhausted { attempts: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn never_accepts_a_code_for_another_target() {
        let store = Arc::new(InMemoryMessageStore::new());
        let since = Utc::now();
        store.insert_at("+911234", json!({ "message": "999999" }), since).unwrap();
        let waiter = OtpWaiter::new(store, Arc::new(LyingClassifier))
            .with_policy(RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(30)));

        let outcome = waiter.wait(&request(since)).await.unwrap();
        assert_eq!(outcome, OtpOutcome::Exhausted { attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn tried_codes_are_skipped_for_older_ones() {
        let store = Arc::new(InMemoryMessageStore::new());
        let since = Utc::now();
        store
            .insert_at("+911234", json!({ "message": "111111 is your Rewards login OTP" }), since)
            .unwrap();
        store
            .insert_at(
                "+911234",
                json!({ "message": "222222 is your Rewards login OTP" }),
                since + chrono::Duration::seconds(1),
            )
            .unwrap();
        let waiter = OtpWaiter::new(store, Arc::new(KeywordOtpClassifier::default()))
            .with_policy(RetryPolicy::exponential(2, Duration::from_secs(1), Duration::from_secs(30)));

        let OtpOutcome::Found(result) = waiter.wait_excluding(&request(since), &["222222".into()]).await.unwrap()
        else {
            panic!("expected a code");
        };
        assert_eq!(result.code, "111111");

        let outcome = waiter
            .wait_excluding(&request(since), &["111111".into(), "222222".into()])
            .await
            .unwrap();
        assert_eq!(outcome, OtpOutcome::Exhausted { attempts: 2 });
    }

    #[tokio::test]
    async fn blank_sender_is_rejected() {
        let waiter = OtpWaiter::new(
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(KeywordOtpClassifier::default()),
        );
        let mut req = request(Utc::now());
        req.sender = "  ".into();
        assert!(matches!(waiter.wait(&req).await, Err(OtpError::Contract(_))));
    }
}
