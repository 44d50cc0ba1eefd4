//! Workflow error taxonomy.

use std::time::Duration;

use voucherflow_core::{ContractViolation, JobId, OtpPurpose, Portal};
use voucherflow_vouchers::AllocationError;

use crate::jobs::JobStoreError;
use crate::otp::OtpError;
use crate::portals::PortalError;
use crate::steps::{CheckpointError, ExecutorError, GateError, RetryClass, RetryDecision};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Bad request shape. Rejected before any job exists.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unsupported amount: {0}")]
    UnsupportedAmount(u32),

    #[error("inventory exhausted: no allocation covers {amount} for unit {unit}")]
    InventoryExhausted { amount: u32, unit: u32 },

    #[error("authentication failed for {portal}: {reason}")]
    AuthenticationFailed { portal: Portal, reason: String },

    /// The portal refused a delivered OTP. The login waits for a newer code.
    #[error("{portal} rejected the otp")]
    OtpRejected { portal: Portal, code: String },

    /// The OTP has not arrived yet. The wait can be invoked again.
    #[error("no {purpose} otp for {portal} yet")]
    OtpTimeout {
        portal: Portal,
        purpose: OtpPurpose,
        retry_after: Duration,
    },

    #[error("monthly purchase limit exceeded: {0}")]
    MonthlyLimitExceeded(String),

    #[error("{operation} failed: {source}")]
    TransientPortal {
        operation: &'static str,
        #[source]
        source: PortalError,
    },

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    JobStore(#[from] JobStoreError),

    #[error(transparent)]
    Contract(#[from] ContractViolation),

    #[error(transparent)]
    Otp(#[from] OtpError),
}

impl WorkflowError {
    pub fn transient(operation: &'static str, source: PortalError) -> Self {
        Self::TransientPortal { operation, source }
    }

    /// Map a portal failure: a refused session is an authentication failure,
    /// anything else may clear up on retry.
    pub fn from_portal(portal: Portal, operation: &'static str, source: PortalError) -> Self {
        match source {
            PortalError::Unauthorized(reason) => Self::AuthenticationFailed { portal, reason },
            other => Self::transient(operation, other),
        }
    }

    /// Whether this error ends the job as `failed`.
    ///
    /// Storage and gate faults leave the job `processing` so a later
    /// invocation resumes it from its checkpoints.
    pub fn fails_job(&self) -> bool {
        !matches!(
            self,
            WorkflowError::Checkpoint(_)
                | WorkflowError::Gate(_)
                | WorkflowError::JobStore(_)
                | WorkflowError::JobNotFound(_)
                | WorkflowError::Otp(OtpError::Store(_))
        )
    }
}

impl From<AllocationError> for WorkflowError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::UnsupportedAmount(amount) => WorkflowError::UnsupportedAmount(amount),
            AllocationError::InventoryExhausted { amount, unit } => WorkflowError::InventoryExhausted { amount, unit },
        }
    }
}

impl From<ExecutorError> for WorkflowError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Checkpoint(e) => WorkflowError::Checkpoint(e),
            ExecutorError::Gate(e) => WorkflowError::Gate(e),
            ExecutorError::Contract(e) => WorkflowError::Contract(e),
        }
    }
}

impl RetryClass for WorkflowError {
    fn retry_class(&self) -> RetryDecision {
        match self {
            WorkflowError::TransientPortal { .. } => RetryDecision::Retry,
            WorkflowError::OtpTimeout { retry_after, .. } => RetryDecision::RetryAfter(*retry_after),
            WorkflowError::JobStore(_) | WorkflowError::Otp(OtpError::Store(_)) => RetryDecision::Retry,
            _ => RetryDecision::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_failures_abort() {
        for err in [
            WorkflowError::MonthlyLimitExceeded("cap".into()),
            WorkflowError::InventoryExhausted { amount: 1000, unit: 1 },
            WorkflowError::AuthenticationFailed {
                portal: Portal::RedemptionTarget,
                reason: "bad otp".into(),
            },
        ] {
            assert_eq!(err.retry_class(), RetryDecision::Abort);
            assert!(err.fails_job());
        }
    }

    #[test]
    fn transient_failures_retry() {
        let err = WorkflowError::transient("purchase", PortalError::Transport("reset".into()));
        assert_eq!(err.retry_class(), RetryDecision::Retry);

        let err = WorkflowError::OtpTimeout {
            portal: Portal::RewardsMultiplier,
            purpose: OtpPurpose::Login,
            retry_after: Duration::from_secs(10),
        };
        assert_eq!(err.retry_class(), RetryDecision::RetryAfter(Duration::from_secs(10)));
    }

    #[test]
    fn unauthorized_portal_errors_are_authentication_failures() {
        let err = WorkflowError::from_portal(
            Portal::VoucherMarketplace,
            "validate otp",
            PortalError::Unauthorized("invalid otp".into()),
        );
        assert!(matches!(err, WorkflowError::AuthenticationFailed { .. }));
    }

    #[test]
    fn rejected_otp_is_not_retried_as_is() {
        let err = WorkflowError::OtpRejected {
            portal: Portal::RedemptionTarget,
            code: "735102".into(),
        };
        assert_eq!(err.retry_class(), RetryDecision::Abort);
        assert!(!err.to_string().contains("735102"));
    }

    #[test]
    fn storage_faults_leave_the_job_resumable() {
        let err = WorkflowError::Checkpoint(CheckpointError::Storage("down".into()));
        assert!(!err.fails_job());
    }
}
