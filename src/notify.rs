//! Notification worker: drains the escalation and ingestion queues and turns
//! each event into an administrator notification.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use crate::queue::{
    EscalationEvent, EventConsumer, EventHandler, IngestionCompleteEvent, INGESTION_COMPLETE,
    QUERY_ESCALATED, QUEUES,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        tracing::info!(subject = %notification.subject, "{}", notification.body);
        Ok(())
    }
}

pub fn render_escalation(event: &EscalationEvent) -> Notification {
    Notification {
        subject: "New Query Escalation Requires Attention".to_string(),
        body: format!(
            "A student query has been escalated and requires administrator attention.\n\
             Escalation ID: {}\n\
             User ID: {}\n\
             Query: {}\n\
             Please review and resolve this escalation in the admin panel.",
            event.escalation_id, event.user_id, event.query
        ),
    }
}

pub fn render_ingestion(event: &IngestionCompleteEvent) -> Notification {
    Notification {
        subject: format!("Document Ingestion Complete: {}", event.title),
        body: format!(
            "A new document has been processed and added to the knowledge base.\n\
             Title: {}\n\
             Type: {}\n\
             Chunks: {}\n\
             The chatbot can now answer questions based on this document.",
            event.title, event.doc_type, event.chunk_count
        ),
    }
}

/// Renders queue payloads and passes them to a [`Notifier`].
///
/// A payload that cannot be rendered is logged and acknowledged, since no
/// retry will ever make it readable. Notifier failures and panics are
/// returned as errors so the message stays queued.
pub struct NotificationHandler {
    notifier: Arc<dyn Notifier>,
}

impl NotificationHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    fn render(queue: &str, payload: Value) -> Result<Notification> {
        match queue {
            QUERY_ESCALATED => {
                let event: EscalationEvent = serde_json::from_value(payload)?;
                tracing::info!("Query escalated: {}", event.escalation_id);
                Ok(render_escalation(&event))
            }
            INGESTION_COMPLETE => {
                let event: IngestionCompleteEvent = serde_json::from_value(payload)?;
                tracing::info!("Ingestion complete: {}", event.document_id);
                Ok(render_ingestion(&event))
            }
            other => anyhow::bail!("Unknown queue: {}", other),
        }
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
    async fn handle(&self, queue: &str, payload: Value) -> Result<()> {
        let notification = match Self::render(queue, payload) {
            Ok(notification) => notification,
            Err(e) => {
                tracing::error!("Discarding unreadable message from {}: {}", queue, e);
                return Ok(());
            }
        };

        match std::panic::AssertUnwindSafe(self.notifier.send(&notification))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic_info) => {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                anyhow::bail!("Notification handler panicked: {}", msg)
            }
        }
    }
}

pub struct NotificationWorker {
    consumer: Arc<dyn EventConsumer>,
    handler: NotificationHandler,
    poll_interval: Duration,
}

impl NotificationWorker {
    pub fn new(
        consumer: Arc<dyn EventConsumer>,
        notifier: Arc<dyn Notifier>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            consumer,
            handler: NotificationHandler::new(notifier),
            poll_interval,
        }
    }

    /// Drains every queue once. Returns how many messages were acknowledged,
    /// discarded ones included. A message whose notification fails stays
    /// queued and the rest of its queue waits for the next pass.
    pub async fn run_once(&self) -> usize {
        let mut handled = 0;

        for queue in QUEUES {
            loop {
                match self.consumer.consume_one(queue, &self.handler).await {
                    Ok(true) => handled += 1,
                    Ok(false) => break,
                    Err(e) => {
                        tracing::error!("Error handling message from {}: {}", queue, e);
                        break;
                    }
                }
            }
        }

        handled
    }

    pub async fn run(&self) {
        tracing::info!("Notification worker waiting for messages");
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            self.run_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;
    use uuid::Uuid;

    use crate::models::DocumentType;
    use crate::queue::memory::MemoryQueue;
    use crate::queue::EventPublisher;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for Outbox {
        async fn send(&self, notification: &Notification) -> Result<()> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct PanickingNotifier;

    #[async_trait]
    impl Notifier for PanickingNotifier {
        async fn send(&self, _notification: &Notification) -> Result<()> {
            panic!("template exploded")
        }
    }

    fn escalation_event() -> EscalationEvent {
        EscalationEvent {
            escalation_id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            query: "Is there a hackathon?".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_render_ingestion() {
        let n = render_ingestion(&IngestionCompleteEvent {
            document_id: Uuid::nil(),
            title: "Handbook".to_string(),
            doc_type: DocumentType::Pdf,
            chunk_count: 12,
            timestamp: Utc::now(),
        });
        assert_eq!(n.subject, "Document Ingestion Complete: Handbook");
        assert!(n.body.contains("Type: PDF"));
        assert!(n.body.contains("Chunks: 12"));
    }

    #[tokio::test]
    async fn test_run_once_drains_both_queues() {
        let queue = Arc::new(MemoryQueue::new());
        let event = escalation_event();
        queue
            .publish(QUERY_ESCALATED, serde_json::to_value(&event).unwrap())
            .await
            .unwrap();
        queue
            .publish(
                INGESTION_COMPLETE,
                serde_json::to_value(IngestionCompleteEvent {
                    document_id: Uuid::new_v4(),
                    title: "Fees".to_string(),
                    doc_type: DocumentType::Text,
                    chunk_count: 1,
                    timestamp: Utc::now(),
                })
                .unwrap(),
            )
            .await
            .unwrap();

        let outbox = Arc::new(Outbox::default());
        let worker = NotificationWorker::new(queue.clone(), outbox.clone(), Duration::from_secs(1));

        assert_eq!(worker.run_once().await, 2);
        let sent = outbox.sent.lock().unwrap().clone();
        assert_eq!(sent[0].subject, "New Query Escalation Requires Attention");
        assert!(sent[0].body.contains(&event.escalation_id.to_string()));
        assert_eq!(sent[1].subject, "Document Ingestion Complete: Fees");
        assert!(queue.pending(QUERY_ESCALATED).await.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_notifier_leaves_message_queued() {
        let queue = Arc::new(MemoryQueue::new());
        queue
            .publish(QUERY_ESCALATED, serde_json::to_value(escalation_event()).unwrap())
            .await
            .unwrap();

        let worker = NotificationWorker::new(
            queue.clone(),
            Arc::new(PanickingNotifier),
            Duration::from_secs(1),
        );

        assert_eq!(worker.run_once().await, 0);
        assert_eq!(queue.pending(QUERY_ESCALATED).await.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_discarded() {
        let outbox = Arc::new(Outbox::default());
        let handler = NotificationHandler::new(outbox.clone());
        handler
            .handle(QUERY_ESCALATED, serde_json::json!({"bogus": true}))
            .await
            .unwrap();
        handler
            .handle("no.such.queue", serde_json::to_value(escalation_event()).unwrap())
            .await
            .unwrap();
        assert!(outbox.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_does_not_block_later_messages() {
        let queue = Arc::new(MemoryQueue::new());
        queue
            .publish(QUERY_ESCALATED, serde_json::json!({"bogus": true}))
            .await
            .unwrap();
        let event = escalation_event();
        queue
            .publish(QUERY_ESCALATED, serde_json::to_value(&event).unwrap())
            .await
            .unwrap();

        let outbox = Arc::new(Outbox::default());
        let worker = NotificationWorker::new(queue.clone(), outbox.clone(), Duration::from_secs(1));

        assert_eq!(worker.run_once().await, 2);
        let sent = outbox.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains(&event.escalation_id.to_string()));
        assert!(queue.pending(QUERY_ESCALATED).await.is_empty());
    }
}
