//! Step executor: checkpointed, gated and retried execution of named steps.
//!
//! `run_step(job, spec, body)` runs `body` at most once to a committed result
//! per `(job, step name)`. Later calls replay the stored output. A crash after
//! the body's side effect but before the commit means the body runs again on
//! the next invocation, so bodies should prefer idempotent external calls.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use voucherflow_core::{Contract, ContractViolation, JobId};

use super::checkpoint::{CheckpointError, CheckpointStore};
use super::gate::{ConcurrencyGate, GateError};
use super::types::{CheckpointState, RetryClass, RetryDecision, StepSpec};

/// Failures of the executor itself, as opposed to the step body.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("contract violated: {0}")]
    Contract(#[from] ContractViolation),
}

pub struct StepExecutor {
    checkpoints: Arc<dyn CheckpointStore>,
    gate: Arc<ConcurrencyGate>,
}

impl StepExecutor {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>, gate: Arc<ConcurrencyGate>) -> Self {
        Self { checkpoints, gate }
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Run `body` as step `spec.name` of `job_id`.
    ///
    /// Each attempt holds the step's concurrency permits only while the body
    /// runs; backoff sleeps happen outside the gate.
    pub async fn run_step<T, E, F, Fut>(&self, job_id: JobId, spec: &StepSpec, mut body: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Contract,
        E: RetryClass + From<ExecutorError> + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.replay(job_id, spec).await? {
            return Ok(value);
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let permit = self
                .gate
                .admit(spec.kind, job_id, &spec.limits)
                .await
                .map_err(|e| E::from(ExecutorError::from(e)))?;

            // Another holder of the same key may have committed while we queued.
            if attempt == 1 {
                if let Some(value) = self.replay(job_id, spec).await? {
                    return Ok(value);
                }
            }

            self.checkpoints
                .mark_in_flight(job_id, &spec.name, attempt)
                .await
                .map_err(|e| E::from(ExecutorError::from(e)))?;
            debug!(job_id = %job_id, step = %spec.name, attempt, "running step");

            let result = body().await.and_then(|value| match value.validate() {
                Ok(()) => Ok(value),
                Err(violation) => Err(E::from(ExecutorError::from(violation))),
            });
            drop(permit);

            let err = match result {
                Ok(value) => return self.commit(job_id, spec, attempt, value).await,
                Err(err) => err,
            };

            let decision = err.retry_class();
            let delay = match decision {
                RetryDecision::Abort => None,
                _ if !spec.retry.should_retry(attempt) => None,
                RetryDecision::RetryAfter(delay) => Some(delay),
                RetryDecision::Retry => Some(spec.retry.delay_for_attempt(attempt)),
            };

            match delay {
                Some(delay) => {
                    warn!(
                        job_id = %job_id,
                        step = %spec.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "step attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    let message = err.to_string();
                    if let Err(e) = self
                        .checkpoints
                        .mark_failed(job_id, &spec.name, &message, attempt)
                        .await
                    {
                        warn!(job_id = %job_id, step = %spec.name, error = %e, "failed to record step failure");
                    }
                    warn!(
                        job_id = %job_id,
                        step = %spec.name,
                        attempts = attempt,
                        retriable = decision != RetryDecision::Abort,
                        error = %message,
                        "step failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn replay<T, E>(&self, job_id: JobId, spec: &StepSpec) -> Result<Option<T>, E>
    where
        T: DeserializeOwned + Contract,
        E: From<ExecutorError>,
    {
        let checkpoint = self
            .checkpoints
            .load(job_id, &spec.name)
            .await
            .map_err(|e| E::from(ExecutorError::from(e)))?;

        let Some(checkpoint) = checkpoint else {
            return Ok(None);
        };
        let CheckpointState::Completed { output, .. } = checkpoint.state else {
            return Ok(None);
        };

        let value: T = serde_json::from_value(output).map_err(|e| E::from(codec_error(spec, e)))?;
        value.validate().map_err(|v| E::from(ExecutorError::from(v)))?;

        debug!(job_id = %job_id, step = %spec.name, "replaying committed step");
        Ok(Some(value))
    }

    async fn commit<T, E>(&self, job_id: JobId, spec: &StepSpec, attempt: u32, value: T) -> Result<T, E>
    where
        T: Serialize,
        E: From<ExecutorError>,
    {
        let output = serde_json::to_value(&value).map_err(|e| E::from(codec_error(spec, e)))?;
        self.checkpoints
            .complete(job_id, &spec.name, output)
            .await
            .map_err(|e| E::from(ExecutorError::from(e)))?;

        info!(job_id = %job_id, step = %spec.name, attempts = attempt, "step committed");
        Ok(value)
    }
}

fn codec_error(spec: &StepSpec, err: serde_json::Error) -> ExecutorError {
    ExecutorError::Checkpoint(CheckpointError::Codec {
        step: spec.name.clone(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::checkpoint::InMemoryCheckpointStore;
    use crate::steps::types::{ConcurrencyScope, RetryPolicy};
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("retry later")]
        Later(Duration),
        #[error("fatal")]
        Fatal,
        #[error(transparent)]
        Executor(#[from] ExecutorError),
    }

    impl RetryClass for TestError {
        fn retry_class(&self) -> RetryDecision {
            match self {
                TestError::Transient => RetryDecision::Retry,
                TestError::Later(d) => RetryDecision::RetryAfter(*d),
                TestError::Fatal | TestError::Executor(_) => RetryDecision::Abort,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Receipt {
        code: String,
    }

    impl Contract for Receipt {
        fn validate(&self) -> Result<(), ContractViolation> {
            ContractViolation::require_non_blank("receipt", "code", &self.code)
        }
    }

    fn executor() -> (StepExecutor, Arc<InMemoryCheckpointStore>) {
        let store = Arc::new(InMemoryCheckpointStore::new());
        (StepExecutor::new(store.clone(), Arc::new(ConcurrencyGate::new())), store)
    }

    fn spec(name: &str) -> StepSpec {
        StepSpec::new("purchase", name)
            .with_retry(RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(30)))
            .limit(ConcurrencyScope::Job, 1)
    }

    #[tokio::test]
    async fn committed_step_is_not_executed_again() {
        let (executor, _) = executor();
        let job = JobId::new();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let receipt: Receipt = executor
                .run_step(job, &spec("purchase-1"), || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok::<_, TestError>(Receipt { code: format!("CODE-{n}") })
                })
                .await
                .unwrap();
            assert_eq!(receipt.code, "CODE-1");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let (executor, _) = executor();
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let receipt: Receipt = executor
            .run_step(JobId::new(), &spec("purchase-1"), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(Receipt { code: "OK".into() })
                }
            })
            .await
            .unwrap();

        assert_eq!(receipt.code, "OK");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(1 + 2));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error_and_record_failure() {
        let (executor, store) = executor();
        let job = JobId::new();
        let calls = AtomicU32::new(0);

        let err = executor
            .run_step::<Receipt, _, _, _>(job, &spec("purchase-1"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Transient)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TestError::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let cp = store.load(job, "purchase-1").await.unwrap().unwrap();
        assert!(matches!(cp.state, CheckpointState::Failed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn non_retriable_failure_stops_immediately() {
        let (executor, _) = executor();
        let calls = AtomicU32::new(0);

        let err = executor
            .run_step::<Receipt, _, _, _>(JobId::new(), &spec("purchase-1"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Fatal)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_backoff() {
        let (executor, _) = executor();
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let _: Receipt = executor
            .run_step(JobId::new(), &spec("otp-wait"), || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TestError::Later(Duration::from_secs(10)))
                } else {
                    Ok(Receipt { code: "123456".into() })
                }
            })
            .await
            .unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn output_violating_contract_is_not_committed() {
        let (executor, store) = executor();
        let job = JobId::new();

        let err = executor
            .run_step(job, &spec("purchase-1"), || async {
                Ok::<_, TestError>(Receipt { code: " ".into() })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TestError::Executor(ExecutorError::Contract(_))));
        let cp = store.load(job, "purchase-1").await.unwrap().unwrap();
        assert!(!cp.is_completed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn steps_sharing_a_job_limit_of_one_never_overlap() {
        let (executor, _) = executor();
        let executor = Arc::new(executor);
        let job = JobId::new();
        let running = Arc::new(AtomicUsize::new(0));
        let windows = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (1..=6)
            .map(|i| {
                let (executor, running, windows) = (executor.clone(), running.clone(), windows.clone());
                tokio::spawn(async move {
                    let spec = spec(&format!("purchase-{i}"));
                    let running = &running;
                    let windows = &windows;
                    executor
                        .run_step(job, &spec, move || async move {
                            let start = std::time::Instant::now();
                            assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                            windows.lock().unwrap().push((start, std::time::Instant::now()));
                            Ok::<_, TestError>(Receipt { code: format!("unit-{i}") })
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let mut windows = windows.lock().unwrap().clone();
        windows.sort();
        assert_eq!(windows.len(), 6);
        for pair in windows.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "execution windows overlapped");
        }
    }

    /// Loses the first commit, like a crash between side effect and checkpoint.
    struct LossyCheckpoints {
        inner: InMemoryCheckpointStore,
        dropped: AtomicU32,
    }

    #[async_trait]
    impl CheckpointStore for LossyCheckpoints {
        async fn load(&self, job_id: JobId, step: &str) -> Result<Option<crate::steps::Checkpoint>, CheckpointError> {
            self.inner.load(job_id, step).await
        }
        async fn mark_in_flight(&self, job_id: JobId, step: &str, attempt: u32) -> Result<(), CheckpointError> {
            self.inner.mark_in_flight(job_id, step, attempt).await
        }
        async fn complete(&self, job_id: JobId, step: &str, output: serde_json::Value) -> Result<(), CheckpointError> {
            if self.dropped.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(CheckpointError::Storage("connection reset".into()));
            }
            self.inner.complete(job_id, step, output).await
        }
        async fn mark_failed(&self, job_id: JobId, step: &str, error: &str, attempts: u32) -> Result<(), CheckpointError> {
            self.inner.mark_failed(job_id, step, error, attempts).await
        }
        async fn list(&self, job_id: JobId) -> Result<Vec<crate::steps::Checkpoint>, CheckpointError> {
            self.inner.list(job_id).await
        }
        async fn remove(&self, job_id: JobId, step: &str) -> Result<(), CheckpointError> {
            self.inner.remove(job_id, step).await
        }
    }

    #[tokio::test]
    async fn lost_commit_reruns_the_body_on_next_invocation() {
        let store = Arc::new(LossyCheckpoints {
            inner: InMemoryCheckpointStore::new(),
            dropped: AtomicU32::new(0),
        });
        let executor = StepExecutor::new(store, Arc::new(ConcurrencyGate::new()));
        let job = JobId::new();
        let calls = AtomicU32::new(0);
        let body = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TestError>(Receipt { code: "CODE".into() })
        };

        let first = executor.run_step::<Receipt, _, _, _>(job, &spec("purchase-1"), body).await;
        assert!(matches!(first, Err(TestError::Executor(ExecutorError::Checkpoint(_)))));

        executor.run_step::<Receipt, _, _, _>(job, &spec("purchase-1"), body).await.unwrap();
        executor.run_step::<Receipt, _, _, _>(job, &spec("purchase-1"), body).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
