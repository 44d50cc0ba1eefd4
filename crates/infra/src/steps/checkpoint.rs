//! Checkpoint storage.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use voucherflow_core::JobId;

use super::types::{Checkpoint, CheckpointState};

/// Checkpoint store abstraction, keyed by `(job_id, step)`.
///
/// A `Completed` checkpoint is final: later writes for the same pair must
/// leave it untouched.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, job_id: JobId, step: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Record that `attempt` of `step` is starting.
    async fn mark_in_flight(&self, job_id: JobId, step: &str, attempt: u32) -> Result<(), CheckpointError>;

    /// Commit the step's output.
    async fn complete(
        &self,
        job_id: JobId,
        step: &str,
        output: serde_json::Value,
    ) -> Result<(), CheckpointError>;

    async fn mark_failed(
        &self,
        job_id: JobId,
        step: &str,
        error: &str,
        attempts: u32,
    ) -> Result<(), CheckpointError>;

    /// All checkpoints of a job, ordered by step name.
    async fn list(&self, job_id: JobId) -> Result<Vec<Checkpoint>, CheckpointError>;

    async fn remove(&self, job_id: JobId, step: &str) -> Result<(), CheckpointError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint for step {step} could not be decoded: {message}")]
    Codec { step: String, message: String },
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory checkpoint store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: RwLock<HashMap<(JobId, String), Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self, job_id: JobId, step: &str, state: CheckpointState) -> Result<(), CheckpointError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CheckpointError::Storage("lock poisoned".to_string()))?;

        let key = (job_id, step.to_string());
        if entries.get(&key).is_some_and(Checkpoint::is_completed) {
            return Ok(());
        }
        entries.insert(
            key,
            Checkpoint {
                job_id,
                step: step.to_string(),
                state,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, job_id: JobId, step: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CheckpointError::Storage("lock poisoned".to_string()))?;
        Ok(entries.get(&(job_id, step.to_string())).cloned())
    }

    async fn mark_in_flight(&self, job_id: JobId, step: &str, attempt: u32) -> Result<(), CheckpointError> {
        self.write(
            job_id,
            step,
            CheckpointState::InFlight {
                attempt,
                started_at: Utc::now(),
            },
        )
    }

    async fn complete(
        &self,
        job_id: JobId,
        step: &str,
        output: serde_json::Value,
    ) -> Result<(), CheckpointError> {
        self.write(
            job_id,
            step,
            CheckpointState::Completed {
                output,
                completed_at: Utc::now(),
            },
        )
    }

    async fn mark_failed(
        &self,
        job_id: JobId,
        step: &str,
        error: &str,
        attempts: u32,
    ) -> Result<(), CheckpointError> {
        self.write(
            job_id,
            step,
            CheckpointState::Failed {
                error: error.to_string(),
                attempts,
                failed_at: Utc::now(),
            },
        )
    }

    async fn list(&self, job_id: JobId) -> Result<Vec<Checkpoint>, CheckpointError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CheckpointError::Storage("lock poisoned".to_string()))?;
        let mut result: Vec<_> = entries
            .values()
            .filter(|c| c.job_id == job_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.step.cmp(&b.step));
        Ok(result)
    }

    async fn remove(&self, job_id: JobId, step: &str) -> Result<(), CheckpointError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CheckpointError::Storage("lock poisoned".to_string()))?;
        entries.remove(&(job_id, step.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completed_checkpoint_is_not_overwritten() {
        let store = InMemoryCheckpointStore::new();
        let job = JobId::new();

        store.mark_in_flight(job, "purchase-1", 1).await.unwrap();
        store.complete(job, "purchase-1", serde_json::json!(["CODE-1"])).await.unwrap();
        store.mark_in_flight(job, "purchase-1", 2).await.unwrap();
        store.mark_failed(job, "purchase-1", "boom", 2).await.unwrap();

        let cp = store.load(job, "purchase-1").await.unwrap().unwrap();
        assert!(matches!(
            cp.state,
            CheckpointState::Completed { ref output, .. } if output == &serde_json::json!(["CODE-1"])
        ));
    }

    #[tokio::test]
    async fn checkpoints_are_scoped_per_job() {
        let store = InMemoryCheckpointStore::new();
        let (a, b) = (JobId::new(), JobId::new());

        store.complete(a, "check-inventory", serde_json::json!(1)).await.unwrap();
        store.complete(a, "amazon-login", serde_json::json!(2)).await.unwrap();

        assert!(store.load(b, "check-inventory").await.unwrap().is_none());
        let steps: Vec<_> = store.list(a).await.unwrap().into_iter().map(|c| c.step).collect();
        assert_eq!(steps, vec!["amazon-login", "check-inventory"]);

        store.remove(a, "amazon-login").await.unwrap();
        assert_eq!(store.list(a).await.unwrap().len(), 1);
    }
}
