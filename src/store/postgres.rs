use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{ChatRepository, DocumentRepository, EscalationRepository, Store};
use crate::models::{
    ChatMessage, Document, DocumentSummary, EscalatedQuery, EscalationStatus, Stats,
};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id UUID PRIMARY KEY,
                title TEXT NOT NULL,
                doc_type TEXT NOT NULL,
                content TEXT NOT NULL,
                filename TEXT,
                chunk_count INTEGER NOT NULL,
                uploaded_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                message TEXT NOT NULL,
                response TEXT,
                is_bot BOOLEAN NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_chat_messages_user
            ON chat_messages(user_id, created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS escalated_queries (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                query TEXT NOT NULL,
                status TEXT NOT NULL,
                resolution TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                resolved_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_escalated_queries_status
            ON escalated_queries(status, created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn chat_message_from_row(row: &PgRow) -> Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        message: row.try_get("message")?,
        response: row.try_get("response")?,
        is_bot: row.try_get("is_bot")?,
        created_at: row.try_get("created_at")?,
    })
}

fn escalation_from_row(row: &PgRow) -> Result<EscalatedQuery> {
    let status: String = row.try_get("status")?;
    Ok(EscalatedQuery {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        query: row.try_get("query")?,
        status: status.parse()?,
        resolution: row.try_get("resolution")?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn document_from_row(row: &PgRow) -> Result<Document> {
    let doc_type: String = row.try_get("doc_type")?;
    Ok(Document {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        doc_type: doc_type.parse()?,
        content: row.try_get("content")?,
        filename: row.try_get("filename")?,
        chunk_count: row.try_get("chunk_count")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

fn summary_from_row(row: &PgRow) -> Result<DocumentSummary> {
    let doc_type: String = row.try_get("doc_type")?;
    Ok(DocumentSummary {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        doc_type: doc_type.parse()?,
        filename: row.try_get("filename")?,
        chunk_count: row.try_get("chunk_count")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

const ESCALATION_COLUMNS: &str = "id, user_id, query, status, resolution, created_at, resolved_at";

#[async_trait]
impl ChatRepository for PgStore {
    async fn append_message(&self, message: &ChatMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, user_id, message, response, is_bot, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message.id)
        .bind(&message.user_id)
        .bind(&message.message)
        .bind(&message.response)
        .bind(message.is_bot)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn history(&self, user_id: &str, limit: i64) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, message, response, is_bot, created_at
            FROM chat_messages
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(chat_message_from_row)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }
}

#[async_trait]
impl EscalationRepository for PgStore {
    async fn create_escalation(&self, user_id: &str, query: &str) -> Result<EscalatedQuery> {
        let escalation = EscalatedQuery {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            query: query.to_string(),
            status: EscalationStatus::Pending,
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO escalated_queries (id, user_id, query, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(escalation.id)
        .bind(&escalation.user_id)
        .bind(&escalation.query)
        .bind(escalation.status.as_str())
        .bind(escalation.created_at)
        .execute(&self.pool)
        .await?;

        Ok(escalation)
    }

    async fn get_escalation(&self, id: Uuid) -> Result<Option<EscalatedQuery>> {
        let sql = format!("SELECT {} FROM escalated_queries WHERE id = $1", ESCALATION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(escalation_from_row).transpose()
    }

    async fn list_escalations(&self, status: Option<EscalationStatus>) -> Result<Vec<EscalatedQuery>> {
        let sql = format!(
            "SELECT {} FROM escalated_queries WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_at DESC",
            ESCALATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(escalation_from_row).collect()
    }

    async fn transition_escalation(
        &self,
        id: Uuid,
        from: &[EscalationStatus],
        to: EscalationStatus,
        resolution: Option<&str>,
    ) -> Result<Option<EscalatedQuery>> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let sql = format!(
            r#"
            UPDATE escalated_queries
            SET status = $2,
                resolution = COALESCE($3, resolution),
                resolved_at = CASE WHEN $2 = 'RESOLVED' THEN NOW() ELSE resolved_at END
            WHERE id = $1 AND status = ANY($4)
            RETURNING {}
            "#,
            ESCALATION_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .bind(to.as_str())
            .bind(resolution)
            .bind(&from)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(escalation_from_row).transpose()
    }
}

#[async_trait]
impl DocumentRepository for PgStore {
    async fn create_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, title, doc_type, content, filename, chunk_count, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(document.id)
        .bind(&document.title)
        .bind(document.doc_type.as_str())
        .bind(&document.content)
        .bind(&document.filename)
        .bind(document.chunk_count)
        .bind(document.uploaded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, doc_type, filename, chunk_count, uploaded_at
            FROM documents
            ORDER BY uploaded_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(summary_from_row).collect()
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, doc_type, content, filename, chunk_count, uploaded_at
            FROM documents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn stats(&self) -> Result<Stats> {
        let (total_documents,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let (total_escalations,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM escalated_queries")
            .fetch_one(&self.pool)
            .await?;
        let (pending_escalations,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM escalated_queries WHERE status = 'PENDING'")
                .fetch_one(&self.pool)
                .await?;
        let (total_messages,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chat_messages")
            .fetch_one(&self.pool)
            .await?;

        Ok(Stats {
            total_documents,
            total_escalations,
            pending_escalations,
            total_messages,
        })
    }
}
