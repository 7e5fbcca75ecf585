use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ChatRepository, DocumentRepository, EscalationRepository, Store};
use crate::models::{
    ChatMessage, Document, DocumentSummary, EscalatedQuery, EscalationStatus, Stats,
};

/// In-process store. Rows are kept in insertion order.
#[derive(Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<ChatMessage>>,
    escalations: RwLock<Vec<EscalatedQuery>>,
    documents: RwLock<Vec<Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatRepository for MemoryStore {
    async fn append_message(&self, message: &ChatMessage) -> Result<()> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn history(&self, user_id: &str, limit: i64) -> Result<Vec<ChatMessage>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let messages = self.messages.read().await;
        let mut latest: Vec<ChatMessage> = messages
            .iter()
            .rev()
            .filter(|m| m.user_id == user_id)
            .take(limit)
            .cloned()
            .collect();
        latest.reverse();
        Ok(latest)
    }
}

#[async_trait]
impl EscalationRepository for MemoryStore {
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
        self.escalations.write().await.push(escalation.clone());
        Ok(escalation)
    }

    async fn get_escalation(&self, id: Uuid) -> Result<Option<EscalatedQuery>> {
        let escalations = self.escalations.read().await;
        Ok(escalations.iter().find(|e| e.id == id).cloned())
    }

    async fn list_escalations(&self, status: Option<EscalationStatus>) -> Result<Vec<EscalatedQuery>> {
        let escalations = self.escalations.read().await;
        Ok(escalations
            .iter()
            .rev()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect())
    }

    async fn transition_escalation(
        &self,
        id: Uuid,
        from: &[EscalationStatus],
        to: EscalationStatus,
        resolution: Option<&str>,
    ) -> Result<Option<EscalatedQuery>> {
        let mut escalations = self.escalations.write().await;
        let Some(escalation) = escalations
            .iter_mut()
            .find(|e| e.id == id && from.contains(&e.status))
        else {
            return Ok(None);
        };

        escalation.status = to;
        if let Some(resolution) = resolution {
            escalation.resolution = Some(resolution.to_string());
        }
        if to == EscalationStatus::Resolved {
            escalation.resolved_at = Some(Utc::now());
        }
        Ok(Some(escalation.clone()))
    }
}

#[async_trait]
impl DocumentRepository for MemoryStore {
    async fn create_document(&self, document: &Document) -> Result<()> {
        self.documents.write().await.push(document.clone());
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let documents = self.documents.read().await;
        Ok(documents.iter().rev().map(DocumentSummary::from).collect())
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let documents = self.documents.read().await;
        Ok(documents.iter().find(|d| d.id == id).cloned())
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool> {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|d| d.id != id);
        Ok(documents.len() < before)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn stats(&self) -> Result<Stats> {
        let escalations = self.escalations.read().await;
        let pending = escalations
            .iter()
            .filter(|e| e.status == EscalationStatus::Pending)
            .count();

        Ok(Stats {
            total_documents: self.documents.read().await.len() as i64,
            total_escalations: escalations.len() as i64,
            pending_escalations: pending as i64,
            total_messages: self.messages.read().await.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentType;

    #[tokio::test]
    async fn test_history_returns_latest_oldest_first() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .append_message(&ChatMessage::from_bot("alice", &format!("m{}", i)))
                .await
                .unwrap();
        }
        store
            .append_message(&ChatMessage::from_bot("bob", "other"))
            .await
            .unwrap();

        let history = store.history("alice", 3).await.unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
        assert!(store.history("carol", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_respects_source_status() {
        let store = MemoryStore::new();
        let esc = store.create_escalation("u1", "parking?").await.unwrap();
        assert_eq!(esc.status, EscalationStatus::Pending);

        let moved = store
            .transition_escalation(esc.id, &[EscalationStatus::Pending], EscalationStatus::InProgress, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.status, EscalationStatus::InProgress);

        let resolved = store
            .transition_escalation(
                esc.id,
                &[EscalationStatus::Pending, EscalationStatus::InProgress],
                EscalationStatus::Resolved,
                Some("Lot B"),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.resolution.as_deref(), Some("Lot B"));
        assert!(resolved.resolved_at.is_some());

        let again = store
            .transition_escalation(esc.id, &[EscalationStatus::Pending], EscalationStatus::InProgress, None)
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_status_and_stats_count() {
        let store = MemoryStore::new();
        let first = store.create_escalation("u1", "a").await.unwrap();
        store.create_escalation("u2", "b").await.unwrap();
        store
            .transition_escalation(first.id, &[EscalationStatus::Pending], EscalationStatus::InProgress, None)
            .await
            .unwrap();

        let pending = store.list_escalations(Some(EscalationStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].query, "b");
        assert_eq!(store.list_escalations(None).await.unwrap().len(), 2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_escalations, 2);
        assert_eq!(stats.pending_escalations, 1);
        assert_eq!(stats.total_documents, 0);
    }

    #[tokio::test]
    async fn test_document_delete() {
        let store = MemoryStore::new();
        let doc = Document {
            id: Uuid::new_v4(),
            title: "Handbook".to_string(),
            doc_type: DocumentType::Text,
            content: "text".to_string(),
            filename: None,
            chunk_count: 1,
            uploaded_at: Utc::now(),
        };
        store.create_document(&doc).await.unwrap();
        assert_eq!(store.list_documents().await.unwrap().len(), 1);

        assert!(store.delete_document(doc.id).await.unwrap());
        assert!(!store.delete_document(doc.id).await.unwrap());
        assert!(store.get_document(doc.id).await.unwrap().is_none());
    }
}
