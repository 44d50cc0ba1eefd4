//! OTP resolution from inbound SMS.
//!
//! ## Components
//!
//! - `MessageStore`: append-only inbound messages (in-memory or `sms_webhooks`)
//! - `OtpClassifier`: reads a message body for a given portal and purpose
//! - `OtpWaiter`: bounded exponential-backoff polling over the store

pub mod classifier;
pub mod message_store;
pub mod postgres;
pub mod waiter;

pub use classifier::{ClassifiedOtp, ClassifierError, KeywordOtpClassifier, OtpClassifier, OtpTarget, extract_code};
pub use message_store::{InMemoryMessageStore, InboundMessage, MessageStore, MessageStoreError};
pub use postgres::PostgresMessageStore;
pub use waiter::{OtpError, OtpOutcome, OtpRequest, OtpResult, OtpWaiter};
