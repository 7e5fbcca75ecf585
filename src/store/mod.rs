//! Relational state: chat log, escalations and ingested documents.
//!
//! [`postgres::PgStore`] is the production backend; [`memory::MemoryStore`]
//! keeps everything in process for tests and local runs.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    ChatMessage, Document, DocumentSummary, EscalatedQuery, EscalationStatus, Stats,
};

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Append-only chat log.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn append_message(&self, message: &ChatMessage) -> Result<()>;

    /// The latest `limit` messages of a user, oldest first.
    async fn history(&self, user_id: &str, limit: i64) -> Result<Vec<ChatMessage>>;
}

#[async_trait]
pub trait EscalationRepository: Send + Sync {
    /// Inserts a new PENDING escalation.
    async fn create_escalation(&self, user_id: &str, query: &str) -> Result<EscalatedQuery>;

    async fn get_escalation(&self, id: Uuid) -> Result<Option<EscalatedQuery>>;

    /// Newest first, optionally filtered by status.
    async fn list_escalations(&self, status: Option<EscalationStatus>) -> Result<Vec<EscalatedQuery>>;

    /// Moves an escalation to `to` if its current status is one of `from`.
    /// `resolved_at` is stamped when `to` is RESOLVED. Returns `None` when no
    /// row matched.
    async fn transition_escalation(
        &self,
        id: Uuid,
        from: &[EscalationStatus],
        to: EscalationStatus,
        resolution: Option<&str>,
    ) -> Result<Option<EscalatedQuery>>;
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn create_document(&self, document: &Document) -> Result<()>;

    /// Newest first.
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>>;

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>>;

    /// Returns whether a row was deleted.
    async fn delete_document(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait Store: ChatRepository + EscalationRepository + DocumentRepository {
    async fn stats(&self) -> Result<Stats>;
}
