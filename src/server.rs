//! HTTP surface: chat, ingestion and admin route groups on one axum router.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::escalation::{self, EscalationPublisher, TransitionError};
use crate::generation::GenerationProvider;
use crate::indexer::{IngestError, IngestSettings, Ingestor};
use crate::models::{
    ApiResponse, ChatMessage, ChatReply, ChatRequest, DocumentSummary, DocumentType,
    EscalatedQuery, EscalationFilter, HistoryQuery, IngestReply, IngestTextRequest,
    ResolveRequest, Stats,
};
use crate::queue::EventPublisher;
use crate::rag::embeddings::EmbeddingProvider;
use crate::rag::vector_store::VectorIndex;
use crate::rag::{RAGEngine, RagSettings};
use crate::store::{
    ChatRepository, DocumentRepository, EscalationRepository, Store, DEFAULT_HISTORY_LIMIT,
};

/// At most this many sources are returned with a chat answer.
pub const MAX_SOURCES: usize = 3;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

// Errors

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(msg) => AppError::BadRequest(msg),
            IngestError::NotFound(_) => AppError::NotFound("Document not found".to_string()),
            IngestError::Chunking(e) => AppError::Internal(e.into()),
            IngestError::Internal(e) => AppError::Internal(e),
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::NotFound(_) => AppError::NotFound("Escalation not found".to_string()),
            TransitionError::EmptyResolution => {
                AppError::BadRequest("Resolution message is required".to_string())
            }
            e @ TransitionError::InvalidTransition { .. } => AppError::BadRequest(e.to_string()),
            TransitionError::Store(e) => AppError::Internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(err) => {
                tracing::error!("Internal server error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
        };

        (status, Json(ApiResponse::error(message))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

// State

/// Everything the pipeline talks to besides the relational store.
pub struct Components {
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
    pub generator: Arc<dyn GenerationProvider>,
    pub cache: Arc<dyn ResponseCache>,
    pub publisher: Arc<dyn EventPublisher>,
}

pub struct AppState {
    chat_log: Arc<dyn ChatRepository>,
    escalation_repo: Arc<dyn EscalationRepository>,
    documents: Arc<dyn DocumentRepository>,
    store: Arc<dyn Store>,
    rag: RAGEngine,
    escalations: EscalationPublisher,
    ingestor: Ingestor,
}

impl AppState {
    pub fn new<S: Store + 'static>(
        store: Arc<S>,
        components: Components,
        rag_settings: RagSettings,
        ingest_settings: IngestSettings,
    ) -> Self {
        let rag = RAGEngine::new(
            components.embeddings.clone(),
            components.index.clone(),
            components.generator,
            components.cache,
            rag_settings,
        );
        let escalations = EscalationPublisher::new(store.clone(), components.publisher.clone());
        let ingestor = Ingestor::new(
            components.embeddings,
            components.index,
            store.clone(),
            components.publisher,
            ingest_settings,
        );

        Self {
            chat_log: store.clone(),
            escalation_repo: store.clone(),
            documents: store.clone(),
            store,
            rag,
            escalations,
            ingestor,
        }
    }

    /// Runs one chat turn: answer, log both sides, escalate if needed.
    pub async fn handle_message(&self, user_id: &str, message: &str) -> Result<ChatReply, AppError> {
        if user_id.trim().is_empty() || message.trim().is_empty() {
            return Err(AppError::BadRequest(
                "userId and message are required".to_string(),
            ));
        }

        tracing::info!("Processing message from user {}", user_id);
        let outcome = self.rag.process_query(message).await;

        self.chat_log
            .append_message(&ChatMessage::from_user(user_id, message, &outcome.response))
            .await?;
        self.chat_log
            .append_message(&ChatMessage::from_bot(user_id, &outcome.response))
            .await?;

        let escalation_id = if outcome.should_escalate {
            Some(self.escalations.escalate(user_id, message).await?.id)
        } else {
            None
        };

        let mut sources = outcome.sources;
        sources.truncate(MAX_SOURCES);

        Ok(ChatReply {
            response: outcome.response,
            from_cache: outcome.from_cache,
            should_escalate: outcome.should_escalate,
            escalation_id,
            sources,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // chat
        .route("/api/chat/message", post(chat_message_handler))
        .route("/api/chat/history/:user_id", get(chat_history_handler))
        .route("/api/chat/cache/clear", post(clear_cache_handler))
        // ingestion
        .route("/api/ingest/text", post(ingest_text_handler))
        .route(
            "/api/ingest/pdf",
            post(ingest_pdf_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/ingest/documents", get(list_documents_handler))
        // admin
        .route("/api/admin/escalations", get(list_escalations_handler))
        .route("/api/admin/escalations/:id", get(get_escalation_handler))
        .route(
            "/api/admin/escalations/:id/in-progress",
            post(mark_in_progress_handler),
        )
        .route("/api/admin/escalations/:id/resolve", post(resolve_handler))
        .route("/api/admin/documents", get(list_documents_handler))
        .route("/api/admin/documents/:id", delete(delete_document_handler))
        .route("/api/admin/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let generation_healthy = state.rag.generation_healthy().await;

    Json(serde_json::json!({
        "status": "ok",
        "service": "campus-chat",
        "timestamp": Utc::now().to_rfc3339(),
        "services": {
            "generation": generation_healthy
        }
    }))
}

// Chat

async fn chat_message_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ChatReply> {
    let reply = state.handle_message(&request.user_id, &request.message).await?;
    Ok(Json(ApiResponse::ok(reply)))
}

async fn chat_history_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<ChatMessage>> {
    let limit = query
        .limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_HISTORY_LIMIT);
    let messages = state.chat_log.history(&user_id, limit).await?;
    Ok(Json(ApiResponse::ok(messages)))
}

async fn clear_cache_handler(State(state): State<Arc<AppState>>) -> ApiResult<()> {
    state.rag.clear_cache().await?;
    tracing::info!("Response cache cleared");
    Ok(Json(ApiResponse::message("Cache cleared successfully")))
}

// Ingestion

async fn ingest_text_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestTextRequest>,
) -> ApiResult<IngestReply> {
    let reply = state
        .ingestor
        .ingest(&request.title, DocumentType::Text, &request.content, None)
        .await?;
    Ok(Json(ApiResponse::with_message("Text processed successfully", reply)))
}

async fn ingest_pdf_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<IngestReply> {
    let mut title = String::new();
    let mut upload: Option<(Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => {
                title = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid title field: {}", e)))?;
            }
            "file" => {
                let is_pdf = field.content_type() == Some("application/pdf")
                    || field
                        .file_name()
                        .is_some_and(|f| f.to_lowercase().ends_with(".pdf"));
                if !is_pdf {
                    return Err(AppError::BadRequest("Only PDF files are allowed".to_string()));
                }
                let filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid file field: {}", e)))?;
                upload = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let Some((filename, bytes)) = upload else {
        return Err(AppError::BadRequest("No PDF file uploaded".to_string()));
    };
    if title.trim().is_empty() {
        return Err(AppError::BadRequest("Document title is required".to_string()));
    }

    let reply = state
        .ingestor
        .ingest_pdf(&title, bytes, filename.as_deref())
        .await?;
    Ok(Json(ApiResponse::with_message("PDF processed successfully", reply)))
}

async fn list_documents_handler(State(state): State<Arc<AppState>>) -> ApiResult<Vec<DocumentSummary>> {
    let documents = state.documents.list_documents().await?;
    Ok(Json(ApiResponse::ok(documents)))
}

// Admin

async fn list_escalations_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<EscalationFilter>,
) -> ApiResult<Vec<EscalatedQuery>> {
    let escalations = state.escalation_repo.list_escalations(filter.status).await?;
    Ok(Json(ApiResponse::ok(escalations)))
}

async fn get_escalation_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<EscalatedQuery> {
    let escalation = state
        .escalation_repo
        .get_escalation(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Escalation not found".to_string()))?;
    Ok(Json(ApiResponse::ok(escalation)))
}

async fn mark_in_progress_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<EscalatedQuery> {
    let escalation = escalation::mark_in_progress(state.escalation_repo.as_ref(), id).await?;
    Ok(Json(ApiResponse::with_message(
        "Escalation marked as in progress",
        escalation,
    )))
}

async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<EscalatedQuery> {
    let escalation =
        escalation::resolve(state.escalation_repo.as_ref(), id, &request.resolution).await?;
    Ok(Json(ApiResponse::with_message(
        "Escalation resolved successfully",
        escalation,
    )))
}

async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    state.ingestor.delete_document(id).await?;
    Ok(Json(ApiResponse::message("Document deleted successfully")))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> ApiResult<Stats> {
    let stats = state.store.stats().await?;
    Ok(Json(ApiResponse::ok(stats)))
}
