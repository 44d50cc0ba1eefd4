//! Bulk purchase orchestrator.
//!
//! One `run(job_id)` drives a job from its last committed step to a terminal
//! status:
//!
//! 1. `check-inventory`: list denominations, allocate every unit
//! 2. both portal logins, concurrently
//! 3. `payment-link-{unit}` for every unit, concurrently up to the configured limit
//! 4. `purchase-{unit}` then `redeem-{unit}-{i}` for each code, strictly in order
//! 5. `completed`, or `failed` with the reason
//!
//! Storage faults leave the job `processing`; invoking `run` again resumes it.

use std::sync::Arc;

use futures::future::{try_join, try_join_all};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use voucherflow_core::{Contract, Job, JobId, JobStatus};
use voucherflow_vouchers::{Inventory, PurchasePlan, allocate_units};

use super::error::WorkflowError;
use super::login::LoginFlow;
use super::stage::WorkflowStage;
use super::steps;
use crate::config::OrchestratorConfig;
use crate::jobs::JobStore;
use crate::otp::{MessageStore, OtpClassifier, OtpWaiter};
use crate::portals::{
    PaymentErrorClass, PaymentErrorClassifier, PaymentLink, PortalError, Purchase, Redemption, RedemptionPortal,
    Session, VoucherPortal,
};
use crate::steps::{CheckpointStore, ConcurrencyGate, ConcurrencyLimit, ConcurrencyScope, StepExecutor};

/// Collaborators of the orchestrator, owned by the process entry point.
#[derive(Clone)]
pub struct WorkflowDeps {
    pub jobs: Arc<dyn JobStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub gate: Arc<ConcurrencyGate>,
    pub messages: Arc<dyn MessageStore>,
    pub otp_classifier: Arc<dyn OtpClassifier>,
    pub payment_errors: Arc<dyn PaymentErrorClassifier>,
    pub marketplace: Arc<dyn VoucherPortal>,
    pub redemption: Arc<dyn RedemptionPortal>,
}

/// What one purchase unit produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit: u32,
    pub order_id: String,
    pub redemptions: Vec<Redemption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReport {
    pub job_id: JobId,
    pub units: Vec<UnitReport>,
}

impl PurchaseReport {
    pub fn voucher_codes(&self) -> Vec<&str> {
        self.units
            .iter()
            .flat_map(|u| u.redemptions.iter().map(|r| r.code.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(PurchaseReport),
    Failed { reason: String },
    /// The job was already terminal; nothing ran.
    AlreadyProcessed(JobStatus),
}

pub struct Orchestrator {
    jobs: Arc<dyn JobStore>,
    payment_errors: Arc<dyn PaymentErrorClassifier>,
    marketplace: Arc<dyn VoucherPortal>,
    redemption: Arc<dyn RedemptionPortal>,
    executor: StepExecutor,
    waiter: OtpWaiter,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(deps: WorkflowDeps, config: OrchestratorConfig) -> Self {
        let waiter = OtpWaiter::new(deps.messages, deps.otp_classifier).with_policy(config.otp_policy());
        Self {
            jobs: deps.jobs,
            payment_errors: deps.payment_errors,
            marketplace: deps.marketplace,
            redemption: deps.redemption,
            executor: StepExecutor::new(deps.checkpoints, deps.gate),
            waiter,
            config,
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Refuse new step admissions. Runs waiting for a slot end with a gate
    /// error and leave their job `processing` for the next start.
    pub fn stop_admitting(&self) {
        self.executor.gate().close();
    }

    /// Drive `job_id` to a terminal status. Concurrent runs of the same job
    /// queue behind each other.
    pub async fn run(&self, job_id: JobId) -> Result<RunOutcome, WorkflowError> {
        let outcome = {
            let _permit = self
                .executor
                .gate()
                .admit(
                    "run",
                    job_id,
                    &[ConcurrencyLimit {
                        scope: ConcurrencyScope::Job,
                        limit: 1,
                    }],
                )
                .await?;
            self.run_admitted(job_id).await
        };

        if let Ok(RunOutcome::Completed(_) | RunOutcome::Failed { .. }) = &outcome {
            self.executor.gate().release_job(job_id);
        }
        outcome
    }

    async fn run_admitted(&self, job_id: JobId) -> Result<RunOutcome, WorkflowError> {
        let job = self
            .jobs
            .find_job(job_id)
            .await?
            .ok_or(WorkflowError::JobNotFound(job_id))?;

        if job.status.is_terminal() {
            info!(job_id = %job_id, status = %job.status, "job already processed");
            return Ok(RunOutcome::AlreadyProcessed(job.status));
        }
        self.jobs.update_status(job_id, JobStatus::Processing).await?;
        info!(job_id = %job_id, amount = %job.amount, quantity = job.quantity.value(), "job processing");

        match self.drive(&job).await {
            Ok(report) => {
                let transition = self.jobs.update_status(job_id, JobStatus::Completed).await?;
                if !transition.applied() {
                    warn!(job_id = %job_id, ?transition, "completion not applied");
                }
                self.forget_sessions(job_id).await;
                info!(job_id = %job_id, stage = %WorkflowStage::Completed, vouchers = report.voucher_codes().len(), "job completed");
                Ok(RunOutcome::Completed(report))
            }
            Err(err) if err.fails_job() => {
                let reason = err.to_string();
                self.jobs.fail(job_id, &reason).await?;
                self.forget_sessions(job_id).await;
                error!(job_id = %job_id, stage = %WorkflowStage::Failed, error = %reason, "job failed");
                Ok(RunOutcome::Failed { reason })
            }
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "job interrupted, left resumable");
                Err(err)
            }
        }
    }

    async fn drive(&self, job: &Job) -> Result<PurchaseReport, WorkflowError> {
        let plans = self.check_inventory(job).await?;
        info!(job_id = %job.id, stage = %WorkflowStage::InventoryChecked, units = plans.len(), "inventory checked");

        let (market, redeem) = self.authenticate(job.id).await?;
        info!(job_id = %job.id, stage = %WorkflowStage::Authenticated, "portals authenticated");

        let links = self.payment_links(job.id, &market, &plans).await?;
        info!(job_id = %job.id, stage = %WorkflowStage::PaymentLinksGenerated, links = links.len(), "payment links generated");

        let mut units = Vec::with_capacity(links.len());
        for (unit, link) in (1u32..).zip(&links) {
            let stage = WorkflowStage::Purchasing { unit };
            info!(job_id = %job.id, stage = %stage, "purchasing unit");
            units.push(self.purchase_unit(job.id, unit, &market, &redeem, link).await?);
        }

        Ok(PurchaseReport { job_id: job.id, units })
    }

    async fn check_inventory(&self, job: &Job) -> Result<Vec<PurchasePlan>, WorkflowError> {
        let marketplace = &self.marketplace;
        let brand = self.config.voucher_brand.as_str();
        let (amount, quantity) = (job.amount.value(), job.quantity.value());

        self.executor
            .run_step(job.id, &steps::check_inventory(&self.config), move || async move {
                let listing = marketplace
                    .list_inventory(brand)
                    .await
                    .map_err(|e| WorkflowError::transient("list inventory", e))?;
                for denomination in &listing {
                    denomination.validate()?;
                }
                Ok::<_, WorkflowError>(allocate_units(amount, quantity, &Inventory::from_listing(&listing))?)
            })
            .await
    }

    async fn authenticate(&self, job_id: JobId) -> Result<(Session, Session), WorkflowError> {
        let flow = LoginFlow {
            executor: &self.executor,
            waiter: &self.waiter,
            config: &self.config,
        };
        try_join(
            flow.login(job_id, &*self.marketplace, self.config.voucher_login_concurrency),
            flow.login(job_id, &*self.redemption, self.config.redemption_login_concurrency),
        )
        .await
    }

    async fn payment_links(
        &self,
        job_id: JobId,
        session: &Session,
        plans: &[PurchasePlan],
    ) -> Result<Vec<PaymentLink>, WorkflowError> {
        try_join_all(
            (1u32..)
                .zip(plans)
                .map(|(unit, plan)| self.payment_link(job_id, unit, session, plan)),
        )
        .await
    }

    async fn payment_link(
        &self,
        job_id: JobId,
        unit: u32,
        session: &Session,
        plan: &PurchasePlan,
    ) -> Result<PaymentLink, WorkflowError> {
        let marketplace = &self.marketplace;
        let classifier = &self.payment_errors;
        let credentials = &self.config.credentials;

        self.executor
            .run_step(job_id, &steps::payment_link(unit, &self.config), move || async move {
                let cart = marketplace
                    .add_to_cart(session, plan)
                    .await
                    .map_err(|e| WorkflowError::from_portal(session.portal, "add to cart", e))?;

                match marketplace.create_payment_link(session, &cart, credentials).await {
                    Ok(link) => Ok(link),
                    Err(err) => Err(classify_payment_error(classifier.as_ref(), err).await),
                }
            })
            .await
    }

    async fn purchase_unit(
        &self,
        job_id: JobId,
        unit: u32,
        market: &Session,
        redeem: &Session,
        link: &PaymentLink,
    ) -> Result<UnitReport, WorkflowError> {
        let marketplace = &self.marketplace;
        let purchase: Purchase = self
            .executor
            .run_step(job_id, &steps::purchase(unit, &self.config), move || async move {
                marketplace
                    .purchase(market, link)
                    .await
                    .map_err(|e| WorkflowError::from_portal(market.portal, "purchase", e))
            })
            .await?;

        let redemption = &self.redemption;
        let mut redemptions = Vec::with_capacity(purchase.vouchers.len());
        for (index, voucher) in (1usize..).zip(&purchase.vouchers) {
            let done: Redemption = self
                .executor
                .run_step(job_id, &steps::redeem(unit, index, &self.config), move || async move {
                    redemption
                        .redeem(redeem, voucher)
                        .await
                        .map_err(|e| WorkflowError::from_portal(redeem.portal, "redeem", e))
                })
                .await?;
            redemptions.push(done);
        }

        Ok(UnitReport {
            unit,
            order_id: purchase.order_id,
            redemptions,
        })
    }

    /// Session tokens, OTP codes and SMS text must not outlive the job run.
    async fn forget_sessions(&self, job_id: JobId) {
        let checkpoints = self.executor.checkpoints();
        let secret_steps = match checkpoints.list(job_id).await {
            Ok(list) => list.into_iter().map(|c| c.step).filter(|s| steps::holds_login_secret(s)),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to list login checkpoints");
                return;
            }
        };
        for step in secret_steps {
            if let Err(e) = checkpoints.remove(job_id, &step).await {
                warn!(job_id = %job_id, step = %step, error = %e, "failed to drop login checkpoint");
            }
        }
    }
}

async fn classify_payment_error(classifier: &dyn PaymentErrorClassifier, err: PortalError) -> WorkflowError {
    let class = match classifier.classify(&err).await {
        Ok(class) => class,
        Err(e) => {
            warn!(error = %e, "payment error classification failed");
            PaymentErrorClass::Other {
                reason: "classification failed".to_string(),
            }
        }
    };
    match class {
        PaymentErrorClass::MonthlyLimitExceeded => WorkflowError::MonthlyLimitExceeded(err.message()),
        PaymentErrorClass::RateLimited | PaymentErrorClass::Other { .. } => {
            warn!(error = %err, class = ?class, "payment link attempt failed");
            WorkflowError::transient("create payment link", err)
        }
    }
}
