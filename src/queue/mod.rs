//! Durable work queues between the chat/ingestion paths and the notification
//! worker. Payloads are JSON; delivery is at-least-once.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::DocumentType;

pub const QUERY_ESCALATED: &str = "query.escalated";
pub const INGESTION_COMPLETE: &str = "ingestion.complete";

pub const QUEUES: [&str; 2] = [QUERY_ESCALATED, INGESTION_COMPLETE];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationEvent {
    pub escalation_id: Uuid,
    pub user_id: String,
    pub query: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionCompleteEvent {
    pub document_id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub chunk_count: i32,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, queue: &str, payload: Value) -> Result<()>;
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, queue: &str, payload: Value) -> Result<()>;
}

#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Hands the oldest message on `queue` to `handler`. The message is removed
    /// only when the handler succeeds; a handler error is returned and the
    /// message stays queued. `Ok(false)` means the queue was empty.
    async fn consume_one(&self, queue: &str, handler: &dyn EventHandler) -> Result<bool>;
}

pub async fn publish_event<T: Serialize + Sync>(
    publisher: &dyn EventPublisher,
    queue: &str,
    event: &T,
) -> Result<()> {
    let payload = serde_json::to_value(event)?;
    publisher.publish(queue, payload).await?;
    tracing::debug!("Published message to {}", queue);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = IngestionCompleteEvent {
            document_id: Uuid::nil(),
            title: "Handbook".to_string(),
            doc_type: DocumentType::Pdf,
            chunk_count: 4,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "PDF");
        assert_eq!(value["chunkCount"], 4);
        assert!(value.get("documentId").is_some());

        let escalation = EscalationEvent {
            escalation_id: Uuid::nil(),
            user_id: "u1".to_string(),
            query: "parking?".to_string(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&escalation).unwrap();
        assert_eq!(value["userId"], "u1");
        assert!(value.get("escalationId").is_some());
    }
}
