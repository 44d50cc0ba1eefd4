//! Service wiring: stores, portals, orchestrator, intake and the invocation bus.

use std::sync::Arc;

use sqlx::PgPool;

use voucherflow_events::{EventEnvelope, InMemoryInvocationBus, InvocationBus, WorkflowEvent};
use voucherflow_infra::{
    config::OrchestratorConfig,
    jobs::{InMemoryJobStore, JobStore, PostgresJobStore},
    otp::{InMemoryMessageStore, KeywordOtpClassifier, MessageStore, PostgresMessageStore},
    portals::{KeywordPaymentErrorClassifier, SandboxRedemptionPortal, SandboxVoucherPortal},
    steps::{CheckpointStore, ConcurrencyGate, InMemoryCheckpointStore, PostgresCheckpointStore},
    workflow::{InvocationWorker, JobIntake, Orchestrator, WorkerHandle, WorkflowDeps},
};

pub type Bus = Arc<InMemoryInvocationBus<EventEnvelope<WorkflowEvent>>>;

/// The three persistence seams, either all in memory or all Postgres.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub messages: Arc<dyn MessageStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            jobs: Arc::new(InMemoryJobStore::new()),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            messages: Arc::new(InMemoryMessageStore::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            jobs: Arc::new(PostgresJobStore::new(pool.clone())),
            checkpoints: Arc::new(PostgresCheckpointStore::new(pool.clone())),
            messages: Arc::new(PostgresMessageStore::new(pool)),
        }
    }
}

pub struct AppServices {
    pub intake: JobIntake<Bus>,
    pub jobs: Arc<dyn JobStore>,
    pub messages: Arc<dyn MessageStore>,
    pub orchestrator: Arc<Orchestrator>,
    bus: Bus,
}

impl AppServices {
    /// Wire the orchestrator against sandbox portals.
    pub fn build(stores: Stores, config: OrchestratorConfig) -> Self {
        let marketplace = SandboxVoucherPortal::new(stores.messages.clone(), config.sender_phone.clone());
        let redemption = SandboxRedemptionPortal::new(stores.messages.clone(), config.sender_phone.clone());

        let deps = WorkflowDeps {
            jobs: stores.jobs.clone(),
            checkpoints: stores.checkpoints,
            gate: Arc::new(ConcurrencyGate::new()),
            messages: stores.messages.clone(),
            otp_classifier: Arc::new(KeywordOtpClassifier::default()),
            payment_errors: Arc::new(KeywordPaymentErrorClassifier),
            marketplace: Arc::new(marketplace),
            redemption: Arc::new(redemption),
        };

        let bus: Bus = Arc::new(InMemoryInvocationBus::new());
        Self {
            intake: JobIntake::new(stores.jobs.clone(), bus.clone()),
            jobs: stores.jobs,
            messages: stores.messages,
            orchestrator: Arc::new(Orchestrator::new(deps, config)),
            bus,
        }
    }

    pub fn in_memory(config: OrchestratorConfig) -> Self {
        Self::build(Stores::in_memory(), config)
    }

    /// Start consuming invocations. The worker stops when the handle is dropped.
    pub fn start_worker(&self) -> WorkerHandle {
        InvocationWorker::spawn(self.orchestrator.clone(), self.bus.subscribe())
    }
}
