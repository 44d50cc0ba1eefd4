//! Step catalogue of the bulk purchase workflow.
//!
//! Names are the checkpoint keys and must stay stable across releases, or
//! in-flight jobs lose their progress.

use voucherflow_core::Portal;

use crate::config::OrchestratorConfig;
use crate::steps::{ConcurrencyScope, RetryPolicy, StepSpec};

pub const CHECK_INVENTORY: &str = "check-inventory";

/// Concurrency kind shared by purchase and redeem steps.
pub const PURCHASE_KIND: &str = "purchase";

fn portal_retry(config: &OrchestratorConfig) -> RetryPolicy {
    RetryPolicy::with_retries(config.step_retries)
}

pub fn check_inventory(config: &OrchestratorConfig) -> StepSpec {
    StepSpec::new("inventory", CHECK_INVENTORY).with_retry(portal_retry(config))
}

pub fn login_start(portal: Portal) -> StepSpec {
    StepSpec::new("login", format!("login-{portal}-start"))
}

pub fn login_request_otp(portal: Portal, config: &OrchestratorConfig) -> StepSpec {
    StepSpec::new("login", format!("login-{portal}-request-otp")).with_retry(portal_retry(config))
}

/// Gate kind held by a login from its start until its OTP is validated.
pub const LOGIN_OTP_KIND: &str = "login-otp";

/// One wait per sender, portal and purpose at a time, across all jobs.
///
/// `round` counts waits within one login; a code the portal rejected sends
/// the login back for another round.
pub fn login_wait_otp(portal: Portal, round: u32, correlation: String, config: &OrchestratorConfig) -> StepSpec {
    let name = match round {
        0 | 1 => format!("login-{portal}-wait-otp"),
        n => format!("login-{portal}-wait-otp-{n}"),
    };
    StepSpec::new("otp-wait", name)
        .with_retry(RetryPolicy::fixed(
            config.otp_wait_retries.saturating_add(1),
            config.otp_retry_after,
        ))
        .limit(ConcurrencyScope::Key(correlation), 1)
}

pub fn login_validate_otp(portal: Portal, config: &OrchestratorConfig) -> StepSpec {
    StepSpec::new("login", session_step(portal)).with_retry(portal_retry(config))
}

/// The step whose checkpoint holds the portal session.
pub fn session_step(portal: Portal) -> String {
    format!("login-{portal}-validate-otp")
}

/// Steps whose checkpoints carry OTP codes, SMS text or session tokens.
pub fn holds_login_secret(step: &str) -> bool {
    step.starts_with("login-") && (step.contains("-wait-otp") || step.ends_with("-validate-otp"))
}

pub fn payment_link(unit: u32, config: &OrchestratorConfig) -> StepSpec {
    StepSpec::new("payment-link", format!("payment-link-{unit}"))
        .with_retry(portal_retry(config))
        .limit(ConcurrencyScope::Job, config.payment_link_concurrency)
}

pub fn purchase(unit: u32, config: &OrchestratorConfig) -> StepSpec {
    StepSpec::new(PURCHASE_KIND, format!("purchase-{unit}"))
        .with_retry(portal_retry(config))
        .limit(ConcurrencyScope::Job, 1)
}

/// `index` is 1-based within the unit's voucher codes.
pub fn redeem(unit: u32, index: usize, config: &OrchestratorConfig) -> StepSpec {
    StepSpec::new(PURCHASE_KIND, format!("redeem-{unit}-{index}"))
        .with_retry(portal_retry(config))
        .limit(ConcurrencyScope::Job, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_per_job() {
        let config = OrchestratorConfig::default();
        let mut names = vec![check_inventory(&config).name];
        for portal in [Portal::VoucherMarketplace, Portal::RedemptionTarget] {
            names.push(login_start(portal).name);
            names.push(login_request_otp(portal, &config).name);
            names.push(login_wait_otp(portal, 1, "k".into(), &config).name);
            names.push(login_wait_otp(portal, 2, "k".into(), &config).name);
            names.push(login_validate_otp(portal, &config).name);
        }
        for unit in 1..=3 {
            names.push(payment_link(unit, &config).name);
            names.push(purchase(unit, &config).name);
            names.push(redeem(unit, 1, &config).name);
            names.push(redeem(unit, 2, &config).name);
        }
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn purchase_and_redeem_share_a_job_limit_of_one() {
        let config = OrchestratorConfig::default();
        let p = purchase(1, &config);
        let r = redeem(1, 1, &config);
        assert_eq!(p.kind, r.kind);
        assert_eq!(p.limits, r.limits);
        assert_eq!(p.limits[0].limit, 1);
    }

    #[test]
    fn otp_wait_retries_count_extra_attempts() {
        let config = OrchestratorConfig::default();
        let spec = login_wait_otp(Portal::RedemptionTarget, 1, "k".into(), &config);
        assert_eq!(spec.retry.max_attempts, 11);
    }

    #[test]
    fn only_otp_and_session_steps_hold_login_secrets() {
        let config = OrchestratorConfig::default();
        for portal in [Portal::VoucherMarketplace, Portal::RedemptionTarget] {
            assert!(holds_login_secret(&login_wait_otp(portal, 1, "k".into(), &config).name));
            assert!(holds_login_secret(&login_wait_otp(portal, 3, "k".into(), &config).name));
            assert!(holds_login_secret(&session_step(portal)));
            assert!(!holds_login_secret(&login_start(portal).name));
            assert!(!holds_login_secret(&login_request_otp(portal, &config).name));
        }
        assert!(!holds_login_secret(&purchase(1, &config).name));
        assert!(!holds_login_secret(CHECK_INVENTORY));
    }
}
