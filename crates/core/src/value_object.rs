//! Validated request values.
//!
//! `Amount` and `Quantity` are value objects: no identity, compared by value,
//! and impossible to construct outside their legal ranges. Serde goes through
//! the same validation so payloads decoded at a boundary are already checked.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Purchase amount per unit, in whole currency units.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Amount(u32);

impl Amount {
    /// Amounts a job may request.
    pub const SUPPORTED: [u32; 2] = [1000, 1500];

    pub fn new(value: u32) -> DomainResult<Self> {
        if Self::SUPPORTED.contains(&value) {
            Ok(Self(value))
        } else {
            Err(DomainError::validation(format!(
                "amount {value} is not supported (expected one of {:?})",
                Self::SUPPORTED
            )))
        }
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Amount {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for u32 {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of purchase units in a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 10;

    pub fn new(value: u32) -> DomainResult<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(DomainError::validation(format!(
                "quantity {value} is out of range ({}..={})",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// 1-based unit ordinals (`1..=quantity`).
    pub fn units(self) -> impl Iterator<Item = u32> {
        1..=self.0
    }
}

impl TryFrom<u32> for Quantity {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for u32 {
    fn from(value: Quantity) -> Self {
        value.0
    }
}
