//! Background worker that turns invocations into orchestrator runs.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use voucherflow_core::{JobId, JobStatus};
use voucherflow_events::{EventEnvelope, Subscription, WorkflowEvent};

use super::orchestrator::{Orchestrator, RunOutcome};

/// Handle to stop a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stop taking new invocations and wait for the loop to exit.
    /// Runs already started keep going on their own tasks.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(error = %e, "invocation worker ended abnormally");
            }
        }
    }
}

pub struct InvocationWorker;

impl InvocationWorker {
    /// Spawn the worker loop. Each `bulk-purchase/initiate` runs on its own
    /// task; the orchestrator serializes duplicate invocations of a job.
    pub fn spawn(orchestrator: Arc<Orchestrator>, mut subscription: Subscription<EventEnvelope<WorkflowEvent>>) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            info!("invocation worker started");
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    next = subscription.recv() => {
                        let Some(envelope) = next else { break };
                        let event_id = envelope.event_id();
                        match envelope.into_payload() {
                            WorkflowEvent::BulkPurchaseInitiate(payload) => {
                                info!(%event_id, job_id = %payload.job_id, "invocation received");
                                spawn_run(orchestrator.clone(), payload.job_id);
                            }
                        }
                    }
                }
            }
            info!("invocation worker stopped");
        });

        WorkerHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }

    /// Re-drive every `pending` or `processing` job, e.g. after a restart.
    pub async fn resume_unfinished(orchestrator: Arc<Orchestrator>, limit: usize) -> Vec<JobId> {
        let mut resumed = Vec::new();
        for status in [JobStatus::Processing, JobStatus::Pending] {
            match orchestrator.jobs().list_by_status(status, limit).await {
                Ok(jobs) => resumed.extend(jobs.into_iter().map(|j| j.id)),
                Err(e) => warn!(status = %status, error = %e, "failed to list unfinished jobs"),
            }
        }
        for job_id in &resumed {
            spawn_run(orchestrator.clone(), *job_id);
        }
        if !resumed.is_empty() {
            info!(count = resumed.len(), "resuming unfinished jobs");
        }
        resumed
    }
}

fn spawn_run(orchestrator: Arc<Orchestrator>, job_id: JobId) {
    tokio::spawn(async move {
        match orchestrator.run(job_id).await {
            Ok(RunOutcome::Completed(report)) => {
                info!(job_id = %job_id, vouchers = report.voucher_codes().len(), "run completed");
            }
            Ok(RunOutcome::Failed { reason }) => warn!(job_id = %job_id, reason = %reason, "run failed"),
            Ok(RunOutcome::AlreadyProcessed(status)) => info!(job_id = %job_id, status = %status, "run skipped"),
            Err(e) => error!(job_id = %job_id, error = %e, "run interrupted"),
        }
    });
}
