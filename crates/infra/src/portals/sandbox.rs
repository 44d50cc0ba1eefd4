//! Deterministic in-process portals for the dev server and tests.
//!
//! `request_otp` drops the login SMS into the inbound message store, the way
//! the SMS gateway webhook would. Failures can be queued per operation and
//! every call is counted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

use voucherflow_core::{OtpPurpose, Portal};
use voucherflow_vouchers::{PurchasePlan, VoucherDenomination};

use super::traits::{PortalLogin, RedemptionPortal, VoucherPortal};
use super::types::{
    Cart, CartLine, LoginCredentials, PaymentLink, PortalError, Purchase, Redemption, Session, VoucherCode,
};
use crate::otp::{MessageStore, OtpTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxOp {
    RequestOtp,
    ValidateOtp,
    ListInventory,
    AddToCart,
    CreatePaymentLink,
    Purchase,
    Redeem,
}

/// Queued failures and call counts shared by the sandbox portals.
#[derive(Debug, Default)]
struct Script {
    failures: Mutex<HashMap<SandboxOp, VecDeque<PortalError>>>,
    calls: Mutex<HashMap<SandboxOp, u32>>,
}

impl Script {
    fn enter(&self, op: SandboxOp) -> Result<(), PortalError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default() += 1;

        let injected = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fail_next(&self, op: SandboxOp, error: PortalError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default()
            .push_back(error);
    }

    fn calls(&self, op: SandboxOp) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&op)
            .copied()
            .unwrap_or(0)
    }
}

/// Login half shared by both sandbox portals.
struct SandboxLogin {
    portal: Portal,
    messages: Arc<dyn MessageStore>,
    sender: String,
    otp_code: String,
    sms_template: &'static str,
    deliver_sms: AtomicBool,
    sessions: AtomicU64,
}

impl SandboxLogin {
    async fn request_otp(&self, script: &Script) -> Result<(), PortalError> {
        script.enter(SandboxOp::RequestOtp)?;
        if !self.deliver_sms.load(Ordering::SeqCst) {
            debug!(portal = %self.portal, "sandbox withholding otp sms");
            return Ok(());
        }
        let text = self.sms_template.replace("{code}", &self.otp_code);
        self.messages
            .append(&self.sender, json!({ "message": text }))
            .await
            .map_err(|e| PortalError::Transport(e.to_string()))?;
        Ok(())
    }

    fn validate_otp(&self, script: &Script, otp: &str) -> Result<Session, PortalError> {
        script.enter(SandboxOp::ValidateOtp)?;
        if otp != self.otp_code {
            return Err(PortalError::Unauthorized("invalid otp".to_string()));
        }
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Session {
            portal: self.portal,
            token: format!("sbx-{}-{n}", self.portal),
        })
    }

    fn check(&self, session: &Session) -> Result<(), PortalError> {
        if session.portal != self.portal || !session.token.starts_with("sbx-") {
            return Err(PortalError::Unauthorized("unknown session".to_string()));
        }
        Ok(())
    }
}

pub struct SandboxVoucherPortal {
    login: SandboxLogin,
    script: Script,
    inventory: Mutex<Vec<VoucherDenomination>>,
    sequence: AtomicU64,
}

impl SandboxVoucherPortal {
    pub const OTP_CODE: &'static str = "482913";

    /// Marketplace whose login SMS arrives from `sender` worded as a
    /// rewards-multiplier message.
    pub fn new(messages: Arc<dyn MessageStore>, sender: impl Into<String>) -> Self {
        Self {
            login: SandboxLogin {
                portal: Portal::VoucherMarketplace,
                messages,
                sender: sender.into(),
                otp_code: Self::OTP_CODE.to_string(),
                sms_template: "{code} is your Rewards Multiplier login OTP. Do not share it.",
                deliver_sms: AtomicBool::new(true),
                sessions: AtomicU64::new(0),
            },
            script: Script::default(),
            inventory: Mutex::new(default_inventory()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_inventory(self, inventory: Vec<VoucherDenomination>) -> Self {
        *self.inventory.lock().unwrap_or_else(PoisonError::into_inner) = inventory;
        self
    }

    pub fn withhold_otp(&self) {
        self.login.deliver_sms.store(false, Ordering::SeqCst);
    }

    pub fn fail_next(&self, op: SandboxOp, error: PortalError) {
        self.script.fail_next(op, error);
    }

    pub fn calls(&self, op: SandboxOp) -> u32 {
        self.script.calls(op)
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

fn default_inventory() -> Vec<VoucherDenomination> {
    [(1000, 20), (500, 40), (250, 80)]
        .into_iter()
        .map(|(amount, available_qty)| VoucherDenomination {
            amount,
            available_qty,
            catalog_id: format!("sbx-denom-{amount}"),
        })
        .collect()
}

#[async_trait]
impl PortalLogin for SandboxVoucherPortal {
    fn portal(&self) -> Portal {
        Portal::VoucherMarketplace
    }

    fn otp_target(&self) -> OtpTarget {
        OtpTarget::new(Portal::RewardsMultiplier, OtpPurpose::Login)
    }

    async fn request_otp(&self, _credentials: &LoginCredentials) -> Result<(), PortalError> {
        self.login.request_otp(&self.script).await
    }

    async fn validate_otp(&self, _credentials: &LoginCredentials, otp: &str) -> Result<Session, PortalError> {
        self.login.validate_otp(&self.script, otp)
    }
}

#[async_trait]
impl VoucherPortal for SandboxVoucherPortal {
    async fn list_inventory(&self, _brand: &str) -> Result<Vec<VoucherDenomination>, PortalError> {
        self.script.enter(SandboxOp::ListInventory)?;
        Ok(self.inventory.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn add_to_cart(&self, session: &Session, plan: &PurchasePlan) -> Result<Cart, PortalError> {
        self.script.enter(SandboxOp::AddToCart)?;
        self.login.check(session)?;
        Ok(Cart {
            cart_id: self.next_id("cart"),
            lines: plan
                .lines()
                .iter()
                .map(|l| CartLine {
                    catalog_id: l.catalog_id.clone(),
                    denomination: l.denomination,
                    quantity: l.quantity,
                })
                .collect(),
        })
    }

    async fn create_payment_link(
        &self,
        session: &Session,
        cart: &Cart,
        _credentials: &LoginCredentials,
    ) -> Result<PaymentLink, PortalError> {
        self.script.enter(SandboxOp::CreatePaymentLink)?;
        self.login.check(session)?;
        Ok(PaymentLink {
            cart: cart.clone(),
            url: format!("https://pay.sandbox.invalid/{}", cart.cart_id),
        })
    }

    async fn purchase(&self, session: &Session, link: &PaymentLink) -> Result<Purchase, PortalError> {
        self.script.enter(SandboxOp::Purchase)?;
        self.login.check(session)?;
        let order_id = self.next_id("order");
        let vouchers: Vec<VoucherCode> = link
            .cart
            .lines
            .iter()
            .flat_map(|line| (0..line.quantity).map(move |_| line.denomination))
            .enumerate()
            .map(|(i, denomination)| VoucherCode {
                code: format!("SBX-{order_id}-{}", i + 1),
                denomination,
            })
            .collect();
        Ok(Purchase { order_id, vouchers })
    }
}

pub struct SandboxRedemptionPortal {
    login: SandboxLogin,
    script: Script,
    sequence: AtomicU64,
}

impl SandboxRedemptionPortal {
    pub const OTP_CODE: &'static str = "735102";

    pub fn new(messages: Arc<dyn MessageStore>, sender: impl Into<String>) -> Self {
        Self {
            login: SandboxLogin {
                portal: Portal::RedemptionTarget,
                messages,
                sender: sender.into(),
                otp_code: Self::OTP_CODE.to_string(),
                sms_template: "{code} is your Amazon login OTP.",
                deliver_sms: AtomicBool::new(true),
                sessions: AtomicU64::new(0),
            },
            script: Script::default(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn withhold_otp(&self) {
        self.login.deliver_sms.store(false, Ordering::SeqCst);
    }

    pub fn fail_next(&self, op: SandboxOp, error: PortalError) {
        self.script.fail_next(op, error);
    }

    pub fn calls(&self, op: SandboxOp) -> u32 {
        self.script.calls(op)
    }
}

#[async_trait]
impl PortalLogin for SandboxRedemptionPortal {
    fn portal(&self) -> Portal {
        Portal::RedemptionTarget
    }

    async fn request_otp(&self, _credentials: &LoginCredentials) -> Result<(), PortalError> {
        self.login.request_otp(&self.script).await
    }

    async fn validate_otp(&self, _credentials: &LoginCredentials, otp: &str) -> Result<Session, PortalError> {
        self.login.validate_otp(&self.script, otp)
    }
}

#[async_trait]
impl RedemptionPortal for SandboxRedemptionPortal {
    async fn redeem(&self, session: &Session, voucher: &VoucherCode) -> Result<Redemption, PortalError> {
        self.script.enter(SandboxOp::Redeem)?;
        self.login.check(session)?;
        Ok(Redemption {
            code: voucher.code.clone(),
            reference: format!("rdm-{}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1),
            redeemed_at: Utc::now(),
        })
    }
}
