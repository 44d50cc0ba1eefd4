//! Boundary contracts.
//!
//! Payloads crossing a step or event boundary implement [`Contract`] so a
//! malformed request or response surfaces as a typed [`ContractViolation`]
//! instead of failing somewhere downstream.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A payload that can check its own shape.
pub trait Contract {
    fn validate(&self) -> Result<(), ContractViolation>;
}

/// A payload did not satisfy its contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{subject}: {message}")]
pub struct ContractViolation {
    pub subject: &'static str,
    pub message: String,
}

impl ContractViolation {
    pub fn new(subject: &'static str, message: impl Into<String>) -> Self {
        Self {
            subject,
            message: message.into(),
        }
    }

    /// Fail with `message` when `value` is blank.
    pub fn require_non_blank(
        subject: &'static str,
        field: &str,
        value: &str,
    ) -> Result<(), ContractViolation> {
        if value.trim().is_empty() {
            return Err(Self::new(subject, format!("{field} must not be empty")));
        }
        Ok(())
    }
}

impl Contract for () {
    fn validate(&self) -> Result<(), ContractViolation> {
        Ok(())
    }
}

impl Contract for DateTime<Utc> {
    fn validate(&self) -> Result<(), ContractViolation> {
        Ok(())
    }
}

impl<T: Contract> Contract for Vec<T> {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.iter().try_for_each(Contract::validate)
    }
}
