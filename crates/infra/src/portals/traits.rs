//! Portal adapter seams.

use async_trait::async_trait;

use voucherflow_core::{OtpPurpose, Portal};
use voucherflow_vouchers::{PurchasePlan, VoucherDenomination};

use super::types::{Cart, LoginCredentials, PaymentLink, PortalError, Purchase, Redemption, Session, VoucherCode};
use crate::otp::OtpTarget;

/// OTP-based login against one portal.
#[async_trait]
pub trait PortalLogin: Send + Sync {
    fn portal(&self) -> Portal;

    /// Portal and purpose the login SMS is classified under.
    fn otp_target(&self) -> OtpTarget {
        OtpTarget::new(self.portal(), OtpPurpose::Login)
    }

    async fn request_otp(&self, credentials: &LoginCredentials) -> Result<(), PortalError>;

    async fn validate_otp(&self, credentials: &LoginCredentials, otp: &str) -> Result<Session, PortalError>;
}

/// The voucher marketplace.
#[async_trait]
pub trait VoucherPortal: PortalLogin {
    async fn list_inventory(&self, brand: &str) -> Result<Vec<VoucherDenomination>, PortalError>;

    async fn add_to_cart(&self, session: &Session, plan: &PurchasePlan) -> Result<Cart, PortalError>;

    async fn create_payment_link(
        &self,
        session: &Session,
        cart: &Cart,
        credentials: &LoginCredentials,
    ) -> Result<PaymentLink, PortalError>;

    async fn purchase(&self, session: &Session, link: &PaymentLink) -> Result<Purchase, PortalError>;
}

/// Where purchased codes are redeemed.
#[async_trait]
pub trait RedemptionPortal: PortalLogin {
    async fn redeem(&self, session: &Session, voucher: &VoucherCode) -> Result<Redemption, PortalError>;
}
