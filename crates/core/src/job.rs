//! Persisted bulk purchase job and its status machine.

use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{JobId, UserId};
use crate::value_object::{Amount, Quantity};

/// Job status.
///
/// Transitions are monotonic: `pending → processing → {completed | failed}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Outcome of a status update request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The status changed.
    Applied { from: JobStatus, to: JobStatus },
    /// Nothing changed: the job already had that status or is terminal.
    Ignored { current: JobStatus },
}

impl Transition {
    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// One end-to-end purchase request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Caller that created the job, when known.
    pub user_id: Option<UserId>,
    pub amount: Amount,
    pub quantity: Quantity,
    pub status: JobStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(user_id: Option<UserId>, amount: Amount, quantity: Quantity) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id,
            amount,
            quantity,
            status: JobStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, enforcing monotonicity.
    ///
    /// Terminal jobs and same-status updates are no-ops. Moving backwards, or
    /// from `pending` straight to a terminal status, is an invariant violation.
    pub fn transition(&mut self, next: JobStatus, at: DateTime<Utc>) -> DomainResult<Transition> {
        let current = self.status;
        if current.is_terminal() || current == next {
            return Ok(Transition::Ignored { current });
        }
        if next.rank() < current.rank() {
            return Err(DomainError::invariant(format!(
                "job {} cannot move from {current} back to {next}",
                self.id
            )));
        }
        if next.rank() > current.rank() + 1 {
            return Err(DomainError::invariant(format!(
                "job {} must be processing before it is {next}",
                self.id
            )));
        }
        self.status = next;
        self.updated_at = at;
        Ok(Transition::Applied { from: current, to: next })
    }

    /// Mark the job failed and remember why.
    pub fn fail(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> DomainResult<Transition> {
        let transition = self.transition(JobStatus::Failed, at)?;
        if transition.applied() {
            self.failure_reason = Some(reason.into());
        }
        Ok(transition)
    }
}
