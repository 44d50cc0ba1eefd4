//! Postgres-backed inbound message store (`sms_webhooks` table).
//!
//! Columns: `id BIGSERIAL`, `sender TEXT`, `raw JSONB`, `created_at TIMESTAMPTZ`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::message_store::{InboundMessage, MessageStore, MessageStoreError};

#[derive(Debug, Clone)]
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    #[instrument(skip(self, raw), err)]
    async fn append(&self, sender: &str, raw: serde_json::Value) -> Result<InboundMessage, MessageStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO sms_webhooks (sender, raw, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, sender, raw, created_at
            "#,
        )
        .bind(sender)
        .bind(&raw)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("append", e))?;

        decode(&row)
    }

    #[instrument(skip(self), err)]
    async fn find_since(&self, sender: &str, since: DateTime<Utc>) -> Result<Vec<InboundMessage>, MessageStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, sender, raw, created_at
            FROM sms_webhooks
            WHERE created_at >= $1 AND strpos(sender, $2) > 0
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(since)
        .bind(sender)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_since", e))?;

        rows.iter().map(decode).collect()
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<InboundMessage, MessageStoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode", e);
    Ok(InboundMessage {
        id: row.try_get("id").map_err(get)?,
        sender: row.try_get("sender").map_err(get)?,
        raw: row.try_get("raw").map_err(get)?,
        created_at: row.try_get("created_at").map_err(get)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> MessageStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            MessageStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => MessageStoreError::Storage(format!("connection pool closed in {}", operation)),
        _ => MessageStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
