//! Runtime configuration for the orchestrator.
//!
//! Every value has a default; `VOUCHERFLOW_*` environment variables override
//! them. Account identity defaults to sandbox placeholders so the dev server
//! runs against the sandbox portals without setup.

use std::time::Duration;

use tokio::sync::Semaphore;

use crate::portals::LoginCredentials;
use crate::steps::RetryPolicy;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Concurrent payment-link steps per job.
    pub payment_link_concurrency: usize,
    /// Concurrent marketplace logins across all jobs.
    pub voucher_login_concurrency: usize,
    /// Concurrent redemption-portal logins across all jobs.
    pub redemption_login_concurrency: usize,
    /// Retries (after the first attempt) for portal-facing steps.
    pub step_retries: u32,
    pub otp_max_attempts: u32,
    pub otp_base_delay: Duration,
    pub otp_max_delay: Duration,
    /// How many times an exhausted OTP wait is re-invoked.
    pub otp_wait_retries: u32,
    pub otp_retry_after: Duration,
    /// Phone number the OTP SMS are forwarded from.
    pub sender_phone: String,
    pub credentials: LoginCredentials,
    pub voucher_brand: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            payment_link_concurrency: 6,
            voucher_login_concurrency: 5,
            redemption_login_concurrency: 1,
            step_retries: 3,
            otp_max_attempts: 5,
            otp_base_delay: Duration::from_millis(1000),
            otp_max_delay: Duration::from_millis(30_000),
            otp_wait_retries: 10,
            otp_retry_after: Duration::from_secs(10),
            sender_phone: "+910000000000".to_string(),
            credentials: LoginCredentials {
                mobile: "0000000000".to_string(),
                email: "buyer@sandbox.invalid".to_string(),
            },
            voucher_brand: "amazon".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = number(&lookup, "VOUCHERFLOW_PAYMENT_LINK_CONCURRENCY")? {
            config.payment_link_concurrency = permits("VOUCHERFLOW_PAYMENT_LINK_CONCURRENCY", v)?;
        }
        if let Some(v) = number(&lookup, "VOUCHERFLOW_VOUCHER_LOGIN_CONCURRENCY")? {
            config.voucher_login_concurrency = permits("VOUCHERFLOW_VOUCHER_LOGIN_CONCURRENCY", v)?;
        }
        if let Some(v) = number(&lookup, "VOUCHERFLOW_REDEMPTION_LOGIN_CONCURRENCY")? {
            config.redemption_login_concurrency = permits("VOUCHERFLOW_REDEMPTION_LOGIN_CONCURRENCY", v)?;
        }
        if let Some(v) = number(&lookup, "VOUCHERFLOW_STEP_RETRIES")? {
            config.step_retries = count("VOUCHERFLOW_STEP_RETRIES", v)?;
        }
        if let Some(v) = number(&lookup, "VOUCHERFLOW_OTP_MAX_ATTEMPTS")? {
            let v = positive("VOUCHERFLOW_OTP_MAX_ATTEMPTS", v)?;
            config.otp_max_attempts = count("VOUCHERFLOW_OTP_MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = number(&lookup, "VOUCHERFLOW_OTP_BASE_DELAY_MS")? {
            config.otp_base_delay = Duration::from_millis(v);
        }
        if let Some(v) = number(&lookup, "VOUCHERFLOW_OTP_MAX_DELAY_MS")? {
            config.otp_max_delay = Duration::from_millis(v);
        }
        if let Some(v) = number(&lookup, "VOUCHERFLOW_OTP_WAIT_RETRIES")? {
            config.otp_wait_retries = count("VOUCHERFLOW_OTP_WAIT_RETRIES", v)?;
        }
        if let Some(v) = number(&lookup, "VOUCHERFLOW_OTP_RETRY_AFTER_SECS")? {
            config.otp_retry_after = Duration::from_secs(v);
        }
        if let Some(v) = text(&lookup, "VOUCHERFLOW_SENDER_PHONE") {
            config.sender_phone = v;
        }
        if let Some(v) = text(&lookup, "VOUCHERFLOW_ACCOUNT_EMAIL") {
            config.credentials.email = v;
        }
        if let Some(v) = text(&lookup, "VOUCHERFLOW_ACCOUNT_MOBILE") {
            config.credentials.mobile = v;
        }
        if let Some(v) = text(&lookup, "VOUCHERFLOW_VOUCHER_BRAND") {
            config.voucher_brand = v;
        }

        if config.otp_max_delay < config.otp_base_delay {
            return Err(ConfigError::Invalid {
                var: "VOUCHERFLOW_OTP_MAX_DELAY_MS",
                value: config.otp_max_delay.as_millis().to_string(),
                reason: "must not be below the base delay".to_string(),
            });
        }
        Ok(config)
    }

    pub fn with_payment_link_concurrency(mut self, limit: usize) -> Self {
        self.payment_link_concurrency = limit;
        self
    }

    pub fn with_step_retries(mut self, retries: u32) -> Self {
        self.step_retries = retries;
        self
    }

    pub fn with_otp_policy(mut self, max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        self.otp_max_attempts = max_attempts;
        self.otp_base_delay = base_delay;
        self.otp_max_delay = max_delay;
        self
    }

    pub fn with_otp_wait_retries(mut self, retries: u32, retry_after: Duration) -> Self {
        self.otp_wait_retries = retries;
        self.otp_retry_after = retry_after;
        self
    }

    pub fn with_sender_phone(mut self, sender: impl Into<String>) -> Self {
        self.sender_phone = sender.into();
        self
    }

    /// Backoff used by the OTP waiter within one wait.
    pub fn otp_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.otp_max_attempts, self.otp_base_delay, self.otp_max_delay)
    }
}

fn text<F>(lookup: &F, var: &'static str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn number<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = text(lookup, var) else {
        return Ok(None);
    };
    value.parse::<u64>().map(Some).map_err(|e| ConfigError::Invalid {
        var,
        value,
        reason: e.to_string(),
    })
}

fn positive(var: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

fn count(var: &'static str, value: u64) -> Result<u32, ConfigError> {
    u32::try_from(value).map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: format!("must be at most {}", u32::MAX),
    })
}

/// Concurrency limits become semaphore permits, so they are bounded by
/// what a semaphore can hold.
fn permits(var: &'static str, value: u64) -> Result<usize, ConfigError> {
    let value = positive(var, value)?;
    usize::try_from(value)
        .ok()
        .filter(|v| *v <= Semaphore::MAX_PERMITS)
        .ok_or_else(|| ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: format!("must be at most {}", Semaphore::MAX_PERMITS),
        })
}
