//! Postgres-backed checkpoint store (`step_checkpoint` table).
//!
//! The whole [`CheckpointState`] is stored as JSONB. Every write is an upsert
//! guarded by `state->>'state' <> 'completed'`, so a committed step can never
//! be overwritten, even by a concurrent invocation of the same job.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::instrument;

use voucherflow_core::JobId;

use super::checkpoint::{CheckpointError, CheckpointStore};
use super::types::{Checkpoint, CheckpointState};

#[derive(Debug, Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write(&self, job_id: JobId, step: &str, state: CheckpointState) -> Result<(), CheckpointError> {
        let state = serde_json::to_value(&state).map_err(|e| CheckpointError::Codec {
            step: step.to_string(),
            message: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO step_checkpoint (job_id, step, state, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_id, step) DO UPDATE
                SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at
                WHERE step_checkpoint.state->>'state' <> 'completed'
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(step)
        .bind(state)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("write", e))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn load(&self, job_id: JobId, step: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = sqlx::query("SELECT state FROM step_checkpoint WHERE job_id = $1 AND step = $2")
            .bind(job_id.as_uuid())
            .bind(step)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load", e))?;

        row.map(|row| decode(job_id, step.to_string(), &row)).transpose()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn mark_in_flight(&self, job_id: JobId, step: &str, attempt: u32) -> Result<(), CheckpointError> {
        self.write(
            job_id,
            step,
            CheckpointState::InFlight {
                attempt,
                started_at: Utc::now(),
            },
        )
        .await
    }

    #[instrument(skip(self, output), fields(job_id = %job_id), err)]
    async fn complete(&self, job_id: JobId, step: &str, output: serde_json::Value) -> Result<(), CheckpointError> {
        self.write(
            job_id,
            step,
            CheckpointState::Completed {
                output,
                completed_at: Utc::now(),
            },
        )
        .await
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
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
        .await
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn list(&self, job_id: JobId) -> Result<Vec<Checkpoint>, CheckpointError> {
        let rows = sqlx::query("SELECT step, state FROM step_checkpoint WHERE job_id = $1 ORDER BY step ASC")
            .bind(job_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter()
            .map(|row| {
                let step: String = row.try_get("step").map_err(|e| map_sqlx_error("list", e))?;
                decode(job_id, step, row)
            })
            .collect()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn remove(&self, job_id: JobId, step: &str) -> Result<(), CheckpointError> {
        sqlx::query("DELETE FROM step_checkpoint WHERE job_id = $1 AND step = $2")
            .bind(job_id.as_uuid())
            .bind(step)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove", e))?;
        Ok(())
    }
}

fn decode(job_id: JobId, step: String, row: &sqlx::postgres::PgRow) -> Result<Checkpoint, CheckpointError> {
    let state: serde_json::Value = row.try_get("state").map_err(|e| map_sqlx_error("decode", e))?;
    let state = serde_json::from_value(state).map_err(|e| CheckpointError::Codec {
        step: step.clone(),
        message: e.to_string(),
    })?;
    Ok(Checkpoint { job_id, step, state })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> CheckpointError {
    match err {
        sqlx::Error::Database(db_err) => {
            CheckpointError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => CheckpointError::Storage(format!("connection pool closed in {}", operation)),
        _ => CheckpointError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
