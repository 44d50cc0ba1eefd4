//! Postgres-backed job store (`bulk_purchase_job` table).
//!
//! Status changes run in a transaction that locks the row, applies
//! [`Job::transition`] and writes the result, so monotonicity holds across
//! concurrent invocations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use voucherflow_core::{Amount, DomainError, Job, JobId, JobStatus, Quantity, Transition, UserId};

use super::store::{JobStore, JobStoreError};

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

const SELECT_JOB: &str = r#"
    SELECT id, user_id, amount, quantity, status, failure_reason, created_at, updated_at
    FROM bulk_purchase_job
"#;

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply<F>(&self, job_id: JobId, change: F) -> Result<Transition, JobStoreError>
    where
        F: FnOnce(&mut Job) -> Result<Transition, DomainError> + Send,
    {
        let mut tx: Transaction<'_, Postgres> = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let row = sqlx::query(&format!("{SELECT_JOB} WHERE id = $1 FOR UPDATE"))
            .bind(job_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock", e))?
            .ok_or(JobStoreError::NotFound(job_id))?;

        let mut job = decode(&row)?;
        let transition = change(&mut job)?;

        if transition.applied() {
            sqlx::query(
                r#"
                UPDATE bulk_purchase_job
                SET status = $2, failure_reason = $3, updated_at = $4
                WHERE id = $1
                "#,
            )
            .bind(job_id.as_uuid())
            .bind(job.status.as_str())
            .bind(job.failure_reason.as_deref())
            .bind(job.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(transition)
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn create(&self, job: Job) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO bulk_purchase_job
                (id, user_id, amount, quantity, status, failure_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.user_id.map(|u| *u.as_uuid()))
        .bind(job.amount.value() as i32)
        .bind(job.quantity.value() as i32)
        .bind(job.status.as_str())
        .bind(job.failure_reason.as_deref())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(job.id)
            } else {
                map_sqlx_error("create", e)
            }
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn find_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("{SELECT_JOB} WHERE id = $1"))
            .bind(job_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_job", e))?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn update_status(&self, job_id: JobId, status: JobStatus) -> Result<Transition, JobStoreError> {
        self.apply(job_id, |job| job.transition(status, Utc::now())).await
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn fail(&self, job_id: JobId, reason: &str) -> Result<Transition, JobStoreError> {
        let reason = reason.to_string();
        self.apply(job_id, move |job| job.fail(reason, Utc::now())).await
    }

    #[instrument(skip(self), err)]
    async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!("{SELECT_JOB} WHERE status = $1 ORDER BY created_at ASC LIMIT $2"))
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_by_status", e))?;

        rows.iter().map(decode).collect()
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode", e);

    let id: uuid::Uuid = row.try_get("id").map_err(get)?;
    let user_id: Option<uuid::Uuid> = row.try_get("user_id").map_err(get)?;
    let amount: i32 = row.try_get("amount").map_err(get)?;
    let quantity: i32 = row.try_get("quantity").map_err(get)?;
    let status: String = row.try_get("status").map_err(get)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(get)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(get)?;

    Ok(Job {
        id: JobId::from_uuid(id),
        user_id: user_id.map(UserId::from_uuid),
        amount: Amount::new(to_u32(amount)?)?,
        quantity: Quantity::new(to_u32(quantity)?)?,
        status: status.parse()?,
        failure_reason: row.try_get("failure_reason").map_err(get)?,
        created_at,
        updated_at,
    })
}

fn to_u32(value: i32) -> Result<u32, JobStoreError> {
    u32::try_from(value).map_err(|_| JobStoreError::Storage(format!("negative column value: {value}")))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => JobStoreError::Storage(format!("connection pool closed in {}", operation)),
        _ => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
