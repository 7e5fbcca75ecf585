use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Knowledge base

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentType {
    Pdf,
    Text,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Pdf => "PDF",
            DocumentType::Text => "TEXT",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PDF" => Ok(DocumentType::Pdf),
            "TEXT" => Ok(DocumentType::Text),
            other => anyhow::bail!("Unknown document type: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub content: String,
    pub filename: Option<String>,
    pub chunk_count: i32,
    pub uploaded_at: DateTime<Utc>,
}

/// Listing view of a document; the full text is never sent back over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub filename: Option<String>,
    pub chunk_count: i32,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id,
            title: doc.title.clone(),
            doc_type: doc.doc_type,
            filename: doc.filename.clone(),
            chunk_count: doc.chunk_count,
            uploaded_at: doc.uploaded_at,
        }
    }
}

/// Metadata stored next to every chunk in the vector index and returned as a
/// chat "source".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub document_id: Uuid,
    pub document_title: String,
    pub document_type: DocumentType,
    pub chunk_index: usize,
    pub uploaded_at: DateTime<Utc>,
}

/// A chunk of text paired with its embedding. Keeping both in one value means a
/// chunk can never drift out of step with its vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub text: String,
    pub vector: Vec<f32>,
}

/// One immutable record in the vector index.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

// Escalations

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationStatus {
    Pending,
    InProgress,
    Resolved,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Pending => "PENDING",
            EscalationStatus::InProgress => "IN_PROGRESS",
            EscalationStatus::Resolved => "RESOLVED",
        }
    }
}

impl fmt::Display for EscalationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscalationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EscalationStatus::Pending),
            "IN_PROGRESS" => Ok(EscalationStatus::InProgress),
            "RESOLVED" => Ok(EscalationStatus::Resolved),
            other => anyhow::bail!("Unknown escalation status: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalatedQuery {
    pub id: Uuid,
    pub user_id: String,
    pub query: String,
    pub status: EscalationStatus,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// Chat log

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub user_id: String,
    pub message: String,
    pub response: Option<String>,
    pub is_bot: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn from_user(user_id: &str, message: &str, response: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            message: message.to_string(),
            response: Some(response.to_string()),
            is_bot: false,
            created_at: Utc::now(),
        }
    }

    pub fn from_bot(user_id: &str, response: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            message: response.to_string(),
            response: None,
            is_bot: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_documents: i64,
    pub total_escalations: i64,
    pub pending_escalations: i64,
    pub total_messages: i64,
}

// HTTP payloads

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub response: String,
    pub from_cache: bool,
    pub should_escalate: bool,
    pub escalation_id: Option<Uuid>,
    pub sources: Vec<ChunkMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EscalationFilter {
    pub status: Option<EscalationStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestTextRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReply {
    pub document_id: Uuid,
    pub title: String,
    pub chunk_count: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub resolution: String,
}
