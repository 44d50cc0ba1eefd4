//! Portal adapters.
//!
//! ## Components
//!
//! - `PortalLogin`, `VoucherPortal`, `RedemptionPortal`: the calls the workflow makes
//! - `PaymentErrorClassifier`: sorts payment-link rejections into retry classes
//! - `SandboxVoucherPortal`, `SandboxRedemptionPortal`: deterministic stand-ins

pub mod classifier;
pub mod sandbox;
pub mod traits;
pub mod types;

pub use classifier::{KeywordPaymentErrorClassifier, PaymentErrorClass, PaymentErrorClassifier};
pub use sandbox::{SandboxOp, SandboxRedemptionPortal, SandboxVoucherPortal};
pub use traits::{PortalLogin, RedemptionPortal, VoucherPortal};
pub use types::{
    Cart, CartLine, LoginCredentials, PaymentLink, PortalError, Purchase, Redemption, Session, VoucherCode,
};
