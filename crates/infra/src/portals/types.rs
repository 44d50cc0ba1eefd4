//! Values exchanged with portals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use voucherflow_core::{Contract, ContractViolation, Portal};

/// Account identity used for portal logins and order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub mobile: String,
    pub email: String,
}

/// Authenticated session against one portal. Lives for one job run.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub portal: Portal,
    pub token: String,
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("portal", &self.portal)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Contract for Session {
    fn validate(&self) -> Result<(), ContractViolation> {
        ContractViolation::require_non_blank("session", "token", &self.token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub catalog_id: String,
    pub denomination: u32,
    pub quantity: u32,
}

/// Cart created on the marketplace for one purchase unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    /// Marketplace cart item ids, as the order call expects them.
    pub cart_id: String,
    pub lines: Vec<CartLine>,
}

impl Cart {
    pub fn total(&self) -> u32 {
        self.lines.iter().map(|l| l.denomination * l.quantity).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub cart: Cart,
    pub url: String,
}

impl Contract for PaymentLink {
    fn validate(&self) -> Result<(), ContractViolation> {
        ContractViolation::require_non_blank("payment link", "url", &self.url)?;
        ContractViolation::require_non_blank("payment link", "cart_id", &self.cart.cart_id)?;
        if self.cart.lines.is_empty() {
            return Err(ContractViolation::new("payment link", "cart is empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherCode {
    pub code: String,
    pub denomination: u32,
}

/// Result of paying for one purchase unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub order_id: String,
    pub vouchers: Vec<VoucherCode>,
}

impl Contract for Purchase {
    fn validate(&self) -> Result<(), ContractViolation> {
        ContractViolation::require_non_blank("purchase", "order_id", &self.order_id)?;
        if self.vouchers.is_empty() {
            return Err(ContractViolation::new("purchase", "no voucher codes returned"));
        }
        for voucher in &self.vouchers {
            ContractViolation::require_non_blank("purchase", "voucher code", &voucher.code)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    pub code: String,
    pub reference: String,
    pub redeemed_at: DateTime<Utc>,
}

impl Contract for Redemption {
    fn validate(&self) -> Result<(), ContractViolation> {
        ContractViolation::require_non_blank("redemption", "reference", &self.reference)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortalError {
    /// The portal answered with an error payload.
    #[error("portal rejected request with status {status}: {body}")]
    Rejected { status: u16, body: serde_json::Value },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl PortalError {
    /// Human readable message of a rejection payload, if any.
    pub fn message(&self) -> String {
        match self {
            PortalError::Rejected { body, .. } => body
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string()),
            other => other.to_string(),
        }
    }
}
