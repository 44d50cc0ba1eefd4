//! Job intake: validate, persist, enqueue.

use std::sync::Arc;

use tracing::{info, warn};

use voucherflow_core::{Amount, DomainError, Job, Quantity, UserId};
use voucherflow_events::{EventEnvelope, InitiatePurchase, InvocationBus, WorkflowEvent};

use crate::jobs::{JobStore, JobStoreError};

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    JobStore(#[from] JobStoreError),
    /// The job row exists but no worker was told about it.
    #[error("job {job_id} created but not enqueued: {reason}")]
    Enqueue { job_id: voucherflow_core::JobId, reason: String },
}

pub struct JobIntake<B> {
    jobs: Arc<dyn JobStore>,
    bus: B,
}

impl<B> JobIntake<B>
where
    B: InvocationBus<EventEnvelope<WorkflowEvent>>,
{
    pub fn new(jobs: Arc<dyn JobStore>, bus: B) -> Self {
        Self { jobs, bus }
    }

    /// Create a `pending` job and publish `bulk-purchase/initiate` for it.
    pub async fn submit(&self, user_id: Option<UserId>, amount: u32, quantity: u32) -> Result<Job, IntakeError> {
        let amount = Amount::new(amount)?;
        let quantity = Quantity::new(quantity)?;

        let job = Job::new(user_id, amount, quantity);
        self.jobs.create(job.clone()).await?;

        let event = WorkflowEvent::BulkPurchaseInitiate(InitiatePurchase {
            job_id: job.id,
            amount,
            quantity,
        });
        if let Err(e) = self.bus.publish(event.into_envelope()) {
            warn!(job_id = %job.id, error = %e, "failed to enqueue job");
            return Err(IntakeError::Enqueue {
                job_id: job.id,
                reason: e.to_string(),
            });
        }

        info!(job_id = %job.id, amount = %amount, quantity = quantity.value(), "job submitted");
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::InMemoryJobStore;
    use voucherflow_core::JobStatus;
    use voucherflow_events::InMemoryInvocationBus;

    type Bus = Arc<InMemoryInvocationBus<EventEnvelope<WorkflowEvent>>>;

    #[tokio::test]
    async fn submit_persists_and_publishes() {
        let jobs = Arc::new(InMemoryJobStore::new());
        let bus: Bus = Arc::new(InMemoryInvocationBus::new());
        let mut sub = bus.subscribe();
        let intake = JobIntake::new(jobs.clone(), bus);

        let job = intake.submit(None, 1500, 3).await.unwrap();

        assert_eq!(jobs.find_job(job.id).await.unwrap().unwrap().status, JobStatus::Pending);
        let envelope = sub.try_recv().unwrap();
        assert_eq!(envelope.name(), WorkflowEvent::BULK_PURCHASE_INITIATE);
        let WorkflowEvent::BulkPurchaseInitiate(payload) = envelope.into_payload();
        assert_eq!(payload.job_id, job.id);
        assert_eq!(payload.quantity.value(), 3);
    }

    #[tokio::test]
    async fn invalid_requests_create_nothing() {
        let jobs = Arc::new(InMemoryJobStore::new());
        let bus: Bus = Arc::new(InMemoryInvocationBus::new());
        let _sub = bus.subscribe();
        let intake = JobIntake::new(jobs.clone(), bus);

        assert!(matches!(intake.submit(None, 1200, 1).await, Err(IntakeError::Validation(_))));
        assert!(matches!(intake.submit(None, 1000, 11).await, Err(IntakeError::Validation(_))));
        assert!(matches!(intake.submit(None, 1000, 0).await, Err(IntakeError::Validation(_))));
        assert!(jobs.list_by_status(JobStatus::Pending, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_keeps_the_job_for_resume() {
        let jobs = Arc::new(InMemoryJobStore::new());
        let bus: Bus = Arc::new(InMemoryInvocationBus::new());
        let intake = JobIntake::new(jobs.clone(), bus);

        let err = intake.submit(None, 1000, 1).await.unwrap_err();
        assert!(matches!(err, IntakeError::Enqueue { .. }));
        assert_eq!(jobs.list_by_status(JobStatus::Pending, 10).await.unwrap().len(), 1);
    }
}
