use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use voucherflow_core::{Job, JobId, JobStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseRequest {
    pub amount: u32,
    pub quantity: u32,
}

/// Payload posted by the SMS gateway.
#[derive(Debug, Deserialize)]
pub struct SmsWebhookRequest {
    pub sender: String,
    pub raw: serde_json::Value,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct CreatePurchaseResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub amount: u32,
    pub quantity: u32,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            amount: job.amount.value(),
            quantity: job.quantity.value(),
            failure_reason: job.failure_reason,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SmsWebhookResponse {
    pub id: i64,
}
