use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};

use super::{EventConsumer, EventHandler, EventPublisher};

/// Queue backed by the `event_queue` table. Concurrent consumers never see
/// the same row thanks to `FOR UPDATE SKIP LOCKED`.
pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_queue (
                id BIGSERIAL PRIMARY KEY,
                queue TEXT NOT NULL,
                payload JSONB NOT NULL,
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_event_queue_queue ON event_queue(queue, id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for PgQueue {
    async fn publish(&self, queue: &str, payload: Value) -> Result<()> {
        sqlx::query("INSERT INTO event_queue (queue, payload) VALUES ($1, $2)")
            .bind(queue)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventConsumer for PgQueue {
    async fn consume_one(&self, queue: &str, handler: &dyn EventHandler) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, payload
            FROM event_queue
            WHERE queue = $1
            ORDER BY id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(queue)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };

        let id: i64 = row.try_get("id")?;
        let payload: Value = row.try_get("payload")?;

        // Dropping the transaction on error releases the row lock.
        handler.handle(queue, payload).await?;

        sqlx::query("DELETE FROM event_queue WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(true)
    }
}
