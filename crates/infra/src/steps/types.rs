//! Step policies, checkpoints and failure classification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use voucherflow_core::{JobId, Portal};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time
    Fixed,
    /// base * 2^(attempt - 1)
    #[default]
    Exponential,
}

/// Retry policy for a step.
///
/// `max_attempts` counts every execution of the body, the first one included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Run once, never retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Default backoff with `retries` retries after the first attempt.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Exponential backoff without jitter.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        }
    }

    /// Delay to wait after a failed `attempt` (1-indexed), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let raw = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
        };
        let capped = raw.min(self.max_delay);

        if self.jitter <= 0.0 {
            return capped;
        }
        // Deterministic spread in [-jitter, +jitter] keyed on the attempt.
        let spread = ((attempt as f64 * 17.0) % 100.0) / 100.0;
        let offset = capped.as_secs_f64() * self.jitter * (spread - 0.5) * 2.0;
        Duration::from_secs_f64((capped.as_secs_f64() + offset).max(0.0))
    }

    /// Whether another attempt is allowed after `attempt` attempts ran.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Upper bound on time spent sleeping between all attempts.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_for_attempt(a)).sum()
    }
}

/// What the executor should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry with the step's backoff.
    Retry,
    /// Retry after exactly this long.
    RetryAfter(Duration),
    /// Fail the step now.
    Abort,
}

/// Errors returned by step bodies classify themselves.
pub trait RetryClass {
    fn retry_class(&self) -> RetryDecision;
}

/// Who shares a concurrency limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConcurrencyScope {
    /// All invocations of this step kind for one job.
    Job,
    /// All invocations of this step kind against one portal.
    Portal(Portal),
    /// All invocations of this step kind sharing an arbitrary key.
    Key(String),
    /// Every invocation of this step kind.
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyLimit {
    pub scope: ConcurrencyScope,
    pub limit: usize,
}

/// Declaration of a named step.
///
/// `name` identifies the checkpoint and must be unique within a job
/// (`purchase-2`, `redeem-2-1`). `kind` groups steps for concurrency
/// (`purchase`, `redeem`).
#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub name: String,
    pub kind: &'static str,
    pub retry: RetryPolicy,
    pub limits: Vec<ConcurrencyLimit>,
}

impl StepSpec {
    pub fn new(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            retry: RetryPolicy::no_retry(),
            limits: Vec::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn limit(mut self, scope: ConcurrencyScope, limit: usize) -> Self {
        self.limits.push(ConcurrencyLimit { scope, limit });
        self
    }
}

/// Persisted progress of one `(job, step)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckpointState {
    /// An attempt started and has not committed.
    InFlight { attempt: u32, started_at: DateTime<Utc> },
    /// The body succeeded; `output` is replayed instead of re-running it.
    Completed {
        output: serde_json::Value,
        completed_at: DateTime<Utc>,
    },
    /// The step gave up. Re-invoking the job runs it again.
    Failed {
        error: String,
        attempts: u32,
        failed_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_id: JobId,
    pub step: String,
    pub state: CheckpointState,
}

impl Checkpoint {
    pub fn is_completed(&self) -> bool {
        matches!(self.state, CheckpointState::Completed { .. })
    }
}
