//! External portals and OTP purposes.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// An external service with its own login/session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Portal {
    /// Voucher marketplace: inventory, cart, payment links, purchases.
    VoucherMarketplace,
    /// Where purchased voucher codes are redeemed.
    RedemptionTarget,
    /// Rewards programme whose SMS sender delivers the marketplace login OTP.
    RewardsMultiplier,
}

impl Portal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Portal::VoucherMarketplace => "voucher_marketplace",
            Portal::RedemptionTarget => "redemption_target",
            Portal::RewardsMultiplier => "rewards_multiplier",
        }
    }
}

impl core::fmt::Display for Portal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Portal {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voucher_marketplace" => Ok(Portal::VoucherMarketplace),
            "redemption_target" => Ok(Portal::RedemptionTarget),
            "rewards_multiplier" => Ok(Portal::RewardsMultiplier),
            other => Err(DomainError::validation(format!("unknown portal: {other}"))),
        }
    }
}

/// What an OTP is meant to authorize.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Login,
    Transaction,
    PaymentConfirmation,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Login => "login",
            OtpPurpose::Transaction => "transaction",
            OtpPurpose::PaymentConfirmation => "payment_confirmation",
        }
    }
}

impl core::fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
