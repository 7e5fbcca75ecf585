use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{EscalatedQuery, EscalationStatus};
use crate::queue::{publish_event, EscalationEvent, EventPublisher, QUERY_ESCALATED};
use crate::store::EscalationRepository;

/// Records unanswered queries and announces them on `query.escalated`.
pub struct EscalationPublisher {
    repo: Arc<dyn EscalationRepository>,
    publisher: Arc<dyn EventPublisher>,
}

impl EscalationPublisher {
    pub fn new(repo: Arc<dyn EscalationRepository>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { repo, publisher }
    }

    /// The record is written first and its failure propagates. The queue
    /// message is best-effort: a broker failure is logged and the record
    /// stays.
    pub async fn escalate(&self, user_id: &str, query: &str) -> Result<EscalatedQuery> {
        let escalation = self.repo.create_escalation(user_id, query).await?;

        let event = EscalationEvent {
            escalation_id: escalation.id,
            user_id: user_id.to_string(),
            query: query.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(e) = publish_event(self.publisher.as_ref(), QUERY_ESCALATED, &event).await {
            tracing::error!("Failed to publish escalation {}: {}", escalation.id, e);
        }

        tracing::info!("Query escalated: {}", escalation.id);
        Ok(escalation)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("Escalation {0} not found")]
    NotFound(Uuid),

    #[error("Cannot move escalation from {from} to {to}")]
    InvalidTransition {
        from: EscalationStatus,
        to: EscalationStatus,
    },

    #[error("Resolution text is required")]
    EmptyResolution,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub async fn mark_in_progress(
    repo: &dyn EscalationRepository,
    id: Uuid,
) -> Result<EscalatedQuery, TransitionError> {
    transition(repo, id, &[EscalationStatus::Pending], EscalationStatus::InProgress, None).await
}

pub async fn resolve(
    repo: &dyn EscalationRepository,
    id: Uuid,
    resolution: &str,
) -> Result<EscalatedQuery, TransitionError> {
    let resolution = resolution.trim();
    if resolution.is_empty() {
        return Err(TransitionError::EmptyResolution);
    }

    transition(
        repo,
        id,
        &[EscalationStatus::Pending, EscalationStatus::InProgress],
        EscalationStatus::Resolved,
        Some(resolution),
    )
    .await
}

async fn transition(
    repo: &dyn EscalationRepository,
    id: Uuid,
    from: &[EscalationStatus],
    to: EscalationStatus,
    resolution: Option<&str>,
) -> Result<EscalatedQuery, TransitionError> {
    if let Some(updated) = repo.transition_escalation(id, from, to, resolution).await? {
        tracing::info!("Escalation {} moved to {}", id, to);
        return Ok(updated);
    }

    match repo.get_escalation(id).await? {
        Some(current) => Err(TransitionError::InvalidTransition {
            from: current.status,
            to,
        }),
        None => Err(TransitionError::NotFound(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::MemoryQueue;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use serde_json::Value;

    struct DownBroker;

    #[async_trait]
    impl EventPublisher for DownBroker {
        async fn publish(&self, _queue: &str, _payload: Value) -> Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_escalate_records_and_publishes() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let publisher = EscalationPublisher::new(store.clone(), queue.clone());

        let esc = publisher.escalate("u1", "Is there a hackathon?").await.unwrap();
        assert_eq!(esc.status, EscalationStatus::Pending);

        let pending = queue.pending(QUERY_ESCALATED).await;
        assert_eq!(pending.len(), 1);
        let event: EscalationEvent = serde_json::from_value(pending[0].clone()).unwrap();
        assert_eq!(event.escalation_id, esc.id);
        assert_eq!(event.query, "Is there a hackathon?");
    }

    #[tokio::test]
    async fn test_broker_failure_keeps_record() {
        let store = Arc::new(MemoryStore::new());
        let publisher = EscalationPublisher::new(store.clone(), Arc::new(DownBroker));

        let esc = publisher.escalate("u1", "parking?").await.unwrap();
        assert!(store.get_escalation(esc.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let store = MemoryStore::new();
        let esc = store.create_escalation("u1", "q").await.unwrap();

        let err = resolve(&store, esc.id, "   ").await.unwrap_err();
        assert!(matches!(err, TransitionError::EmptyResolution));

        let moved = mark_in_progress(&store, esc.id).await.unwrap();
        assert_eq!(moved.status, EscalationStatus::InProgress);

        let err = mark_in_progress(&store, esc.id).await.unwrap_err();
        assert!(matches!(
            err,
            TransitionError::InvalidTransition { from: EscalationStatus::InProgress, .. }
        ));

        let done = resolve(&store, esc.id, " Answered by email ").await.unwrap();
        assert_eq!(done.status, EscalationStatus::Resolved);
        assert_eq!(done.resolution.as_deref(), Some("Answered by email"));

        let err = resolve(&store, esc.id, "again").await.unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));

        let err = mark_in_progress(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, TransitionError::NotFound(_)));
    }
}
