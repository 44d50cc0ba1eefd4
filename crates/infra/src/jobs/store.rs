//! Job storage implementations.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use voucherflow_core::{DomainError, Job, JobId, JobStatus, Transition};

/// Job store abstraction.
///
/// Status updates go through [`Job::transition`], so a terminal job never
/// changes again and a job never moves backwards.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job.
    async fn create(&self, job: Job) -> Result<(), JobStoreError>;

    async fn find_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Move a job to `status`. Returns `Transition::Ignored` when the job is
    /// already terminal or already in `status`.
    async fn update_status(&self, job_id: JobId, status: JobStatus) -> Result<Transition, JobStoreError>;

    /// Move a job to `failed`, recording `reason`.
    async fn fail(&self, job_id: JobId, reason: &str) -> Result<Transition, JobStoreError>;

    /// Jobs in `status`, oldest first.
    async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<Job>, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply<F>(&self, job_id: JobId, change: F) -> Result<Transition, JobStoreError>
    where
        F: FnOnce(&mut Job) -> Result<Transition, DomainError>,
    {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        Ok(change(job)?)
    }
}

fn poisoned() -> JobStoreError {
    JobStoreError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn find_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&job_id).cloned())
    }

    async fn update_status(&self, job_id: JobId, status: JobStatus) -> Result<Transition, JobStoreError> {
        self.apply(job_id, |job| job.transition(status, Utc::now()))
    }

    async fn fail(&self, job_id: JobId, reason: &str) -> Result<Transition, JobStoreError> {
        self.apply(job_id, |job| job.fail(reason, Utc::now()))
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut result: Vec<_> = jobs.values().filter(|j| j.status == status).cloned().collect();

        result.sort_by_key(|j| j.created_at);
        result.truncate(limit);
        Ok(result)
    }
}
