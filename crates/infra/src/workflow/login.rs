//! Login sub-workflow: request OTP, wait for it, validate it.
//!
//! The whole sub-workflow holds a per-portal login permit, so the number of
//! logins in flight against a portal stays within that portal's tolerance
//! across every job. Inside it, a login also holds its OTP correlation key
//! (sender, portal, purpose) from start to validation: two logins whose SMS
//! look alike never have codes outstanding at the same time.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use voucherflow_core::{JobId, Portal};

use super::error::WorkflowError;
use super::steps;
use crate::config::OrchestratorConfig;
use crate::otp::{OtpOutcome, OtpRequest, OtpResult, OtpTarget, OtpWaiter};
use crate::portals::{PortalError, PortalLogin, Session};
use crate::steps::{ConcurrencyLimit, ConcurrencyScope, StepExecutor};

/// Codes a login may try before giving up.
pub(crate) const OTP_ROUNDS: u32 = 3;

pub(crate) struct LoginFlow<'a> {
    pub executor: &'a StepExecutor,
    pub waiter: &'a OtpWaiter,
    pub config: &'a OrchestratorConfig,
}

impl LoginFlow<'_> {
    pub async fn login<P>(&self, job_id: JobId, portal: &P, limit: usize) -> Result<Session, WorkflowError>
    where
        P: PortalLogin + ?Sized,
    {
        let name = portal.portal();
        let target = portal.otp_target();
        let correlation = correlation_key(&self.config.sender_phone, target);
        let gate = self.executor.gate();

        let _portal_permit = gate
            .admit(
                "login",
                job_id,
                &[ConcurrencyLimit {
                    scope: ConcurrencyScope::Portal(name),
                    limit,
                }],
            )
            .await?;
        let _otp_permit = gate
            .admit(
                steps::LOGIN_OTP_KIND,
                job_id,
                &[ConcurrencyLimit {
                    scope: ConcurrencyScope::Key(correlation.clone()),
                    limit: 1,
                }],
            )
            .await?;
        info!(job_id = %job_id, portal = %name, "login started");

        let since: DateTime<Utc> = self
            .executor
            .run_step(job_id, &steps::login_start(name), || async {
                Ok::<_, WorkflowError>(Utc::now())
            })
            .await?;

        let credentials = &self.config.credentials;
        self.executor
            .run_step(job_id, &steps::login_request_otp(name, self.config), move || async move {
                portal
                    .request_otp(credentials)
                    .await
                    .map_err(|e| WorkflowError::from_portal(name, "request otp", e))
            })
            .await?;

        let request = OtpRequest {
            sender: self.config.sender_phone.clone(),
            portal: target.portal,
            purpose: target.purpose,
            since,
        };
        let mut tried: Vec<String> = Vec::new();
        for round in 1..=OTP_ROUNDS {
            let otp = match self.wait_for_otp(job_id, name, round, &request, &correlation, &tried).await {
                Err(WorkflowError::OtpTimeout { .. }) => {
                    warn!(job_id = %job_id, portal = %name, round, "otp never arrived");
                    return Err(WorkflowError::AuthenticationFailed {
                        portal: name,
                        reason: "otp was not received".to_string(),
                    });
                }
                other => other?,
            };

            match self.validate(job_id, portal, &otp.code).await {
                Ok(session) => {
                    info!(job_id = %job_id, portal = %name, round, "login completed");
                    return Ok(session);
                }
                Err(WorkflowError::OtpRejected { code, .. }) => {
                    warn!(job_id = %job_id, portal = %name, round, "portal rejected the otp, waiting for another");
                    tried.push(code);
                }
                Err(e) => return Err(e),
            }
        }

        Err(WorkflowError::AuthenticationFailed {
            portal: name,
            reason: format!("portal rejected {OTP_ROUNDS} otps"),
        })
    }

    async fn validate<P>(&self, job_id: JobId, portal: &P, code: &str) -> Result<Session, WorkflowError>
    where
        P: PortalLogin + ?Sized,
    {
        let name = portal.portal();
        let credentials = &self.config.credentials;
        let session = self
            .executor
            .run_step(job_id, &steps::login_validate_otp(name, self.config), move || async move {
                portal.validate_otp(credentials, code).await.map_err(|e| match e {
                    PortalError::Unauthorized(_) => WorkflowError::OtpRejected {
                        portal: name,
                        code: code.to_string(),
                    },
                    other => WorkflowError::from_portal(name, "validate otp", other),
                })
            })
            .await
            .map_err(|e| match e {
                WorkflowError::Contract(violation) => WorkflowError::AuthenticationFailed {
                    portal: name,
                    reason: violation.to_string(),
                },
                other => other,
            })?;

        if session.portal != name {
            return Err(WorkflowError::AuthenticationFailed {
                portal: name,
                reason: format!("session issued for {}", session.portal),
            });
        }
        Ok(session)
    }

    async fn wait_for_otp(
        &self,
        job_id: JobId,
        portal: Portal,
        round: u32,
        request: &OtpRequest,
        correlation: &str,
        tried: &[String],
    ) -> Result<OtpResult, WorkflowError> {
        let waiter = self.waiter;
        let retry_after = self.config.otp_retry_after;
        let spec = steps::login_wait_otp(portal, round, correlation.to_string(), self.config);

        self.executor
            .run_step(job_id, &spec, move || async move {
                match waiter.wait_excluding(request, tried).await? {
                    OtpOutcome::Found(result) => Ok(result),
                    OtpOutcome::Exhausted { .. } => Err(WorkflowError::OtpTimeout {
                        portal: request.portal,
                        purpose: request.purpose,
                        retry_after,
                    }),
                }
            })
            .await
    }
}

fn correlation_key(sender: &str, target: OtpTarget) -> String {
    format!("{sender}-{}-{}", target.portal, target.purpose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::{InMemoryMessageStore, KeywordOtpClassifier, MessageStore};
    use crate::portals::{LoginCredentials, SandboxOp, SandboxRedemptionPortal, SandboxVoucherPortal};
    use crate::steps::{ConcurrencyGate, InMemoryCheckpointStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Fixture {
        executor: StepExecutor,
        waiter: OtpWaiter,
        config: OrchestratorConfig,
        messages: Arc<InMemoryMessageStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let messages = Arc::new(InMemoryMessageStore::new());
            let config = OrchestratorConfig::default()
                .with_sender_phone("+911234")
                .with_otp_wait_retries(2, Duration::from_secs(10));
            Self {
                executor: StepExecutor::new(
                    Arc::new(InMemoryCheckpointStore::new()),
                    Arc::new(ConcurrencyGate::new()),
                ),
                waiter: OtpWaiter::new(messages.clone(), Arc::new(KeywordOtpClassifier::default()))
                    .with_policy(config.otp_policy()),
                config,
                messages,
            }
        }

        fn flow(&self) -> LoginFlow<'_> {
            LoginFlow {
                executor: &self.executor,
                waiter: &self.waiter,
                config: &self.config,
            }
        }
    }

    /// Issues a fresh code per request, delivered two seconds later. Each
    /// code logs in once.
    struct FreshCodePortal {
        messages: Arc<InMemoryMessageStore>,
        outstanding: Mutex<Vec<String>>,
        issued: AtomicU32,
        validations: AtomicU32,
        stale_sms_first: bool,
    }

    impl FreshCodePortal {
        fn new(messages: Arc<InMemoryMessageStore>) -> Self {
            Self {
                messages,
                outstanding: Mutex::new(Vec::new()),
                issued: AtomicU32::new(0),
                validations: AtomicU32::new(0),
                stale_sms_first: false,
            }
        }

        /// Also drop an immediately delivered SMS with a code the portal never issued.
        fn with_stale_sms(mut self) -> Self {
            self.stale_sms_first = true;
            self
        }
    }

    #[async_trait]
    impl PortalLogin for FreshCodePortal {
        fn portal(&self) -> Portal {
            Portal::RedemptionTarget
        }

        async fn request_otp(&self, _credentials: &LoginCredentials) -> Result<(), PortalError> {
            let code = (100_000 + self.issued.fetch_add(1, Ordering::SeqCst) + 1).to_string();
            self.outstanding.lock().unwrap().push(code.clone());
            if self.stale_sms_first {
                self.messages
                    .append("+911234", json!({ "message": "999999 is your Amazon login OTP." }))
                    .await
                    .unwrap();
            }
            let messages = self.messages.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                messages
                    .append("+911234", json!({ "message": format!("{code} is your Amazon login OTP.") }))
                    .await
                    .unwrap();
            });
            Ok(())
        }

        async fn validate_otp(&self, _credentials: &LoginCredentials, otp: &str) -> Result<Session, PortalError> {
            self.validations.fetch_add(1, Ordering::SeqCst);
            let mut outstanding = self.outstanding.lock().unwrap();
            match outstanding.iter().position(|c| c == otp) {
                Some(i) => {
                    outstanding.remove(i);
                    Ok(Session {
                        portal: Portal::RedemptionTarget,
                        token: format!("fresh-{otp}"),
                    })
                }
                None => Err(PortalError::Unauthorized("invalid otp".into())),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn logs_in_with_the_delivered_otp() {
        let fx = Fixture::new();
        let portal = SandboxVoucherPortal::new(fx.messages.clone(), "+911234");

        let session = fx.flow().login(JobId::new(), &portal, 5).await.unwrap();

        assert_eq!(session.portal, Portal::VoucherMarketplace);
        assert_eq!(portal.calls(SandboxOp::RequestOtp), 1);
        assert_eq!(portal.calls(SandboxOp::ValidateOtp), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_login_for_the_same_job_replays_the_session() {
        let fx = Fixture::new();
        let portal = SandboxRedemptionPortal::new(fx.messages.clone(), "+911234");
        let job = JobId::new();

        let first = fx.flow().login(job, &portal, 1).await.unwrap();
        let second = fx.flow().login(job, &portal, 1).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(portal.calls(SandboxOp::RequestOtp), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_otp_is_an_authentication_failure() {
        let fx = Fixture::new();
        let portal = SandboxRedemptionPortal::new(fx.messages.clone(), "+911234");
        portal.withhold_otp();

        let err = fx.flow().login(JobId::new(), &portal, 1).await.unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::AuthenticationFailed {
                portal: Portal::RedemptionTarget,
                ..
            }
        ));
        assert_eq!(portal.calls(SandboxOp::ValidateOtp), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_request_failures_are_retried() {
        let fx = Fixture::new();
        let portal = SandboxRedemptionPortal::new(fx.messages.clone(), "+911234");
        portal.fail_next(SandboxOp::RequestOtp, PortalError::Transport("timeout".into()));

        fx.flow().login(JobId::new(), &portal, 1).await.unwrap();
        assert_eq!(portal.calls(SandboxOp::RequestOtp), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_logins_with_lookalike_sms_each_use_their_own_code() {
        let fx = Fixture::new();
        let portal = FreshCodePortal::new(fx.messages.clone());

        let (flow_a, flow_b) = (fx.flow(), fx.flow());
        let (a, b) = tokio::join!(
            flow_a.login(JobId::new(), &portal, 5),
            flow_b.login(JobId::new(), &portal, 5)
        );

        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.token, b.token);
        assert_eq!(portal.issued.load(Ordering::SeqCst), 2);
        assert_eq!(portal.validations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_code_sends_the_login_back_for_a_newer_one() {
        let fx = Fixture::new();
        let portal = FreshCodePortal::new(fx.messages.clone()).with_stale_sms();

        let session = fx.flow().login(JobId::new(), &portal, 1).await.unwrap();

        assert_eq!(session.token, "fresh-100001");
        assert_eq!(portal.validations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_code_is_never_submitted_twice() {
        let fx = Fixture::new();
        let portal = SandboxRedemptionPortal::new(fx.messages.clone(), "+911234");
        portal.fail_next(SandboxOp::ValidateOtp, PortalError::Unauthorized("invalid otp".into()));

        let err = fx.flow().login(JobId::new(), &portal, 1).await.unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::AuthenticationFailed {
                portal: Portal::RedemptionTarget,
                ..
            }
        ));
        assert_eq!(portal.calls(SandboxOp::ValidateOtp), 1);
    }
}
