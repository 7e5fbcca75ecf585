//! Knowledge-base ingestion: extract, chunk, embed, persist, index, announce.

pub mod chunker;
pub mod extractor;
pub mod walker;

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    ChunkMetadata, Document, DocumentChunk, DocumentType, EmbeddedChunk, IngestReply,
};
use crate::queue::{publish_event, EventPublisher, IngestionCompleteEvent, INGESTION_COMPLETE};
use crate::rag::embeddings::EmbeddingProvider;
use crate::rag::vector_store::VectorIndex;
use crate::retry::RetryPolicy;
use crate::store::DocumentRepository;
use self::chunker::{split_text_into_chunks, ChunkError, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),

    #[error("Document {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Chunking(#[from] ChunkError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    pub chunk_size: usize,
    pub overlap: usize,
    pub retry: RetryPolicy,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
            retry: RetryPolicy::default(),
        }
    }
}

pub fn chunk_id(document_id: Uuid, index: usize) -> String {
    format!("{}_chunk_{}", document_id, index)
}

pub struct Ingestor {
    embeddings: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    documents: Arc<dyn DocumentRepository>,
    publisher: Arc<dyn EventPublisher>,
    settings: IngestSettings,
}

impl Ingestor {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        documents: Arc<dyn DocumentRepository>,
        publisher: Arc<dyn EventPublisher>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            embeddings,
            index,
            documents,
            publisher,
            settings,
        }
    }

    pub async fn ingest(
        &self,
        title: &str,
        doc_type: DocumentType,
        content: &str,
        filename: Option<&str>,
    ) -> Result<IngestReply, IngestError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(IngestError::Validation("Title is required".to_string()));
        }
        if content.trim().is_empty() {
            return Err(IngestError::Validation("Content is required".to_string()));
        }

        let chunks = split_text_into_chunks(content, self.settings.chunk_size, self.settings.overlap)?;
        let embedded = self.embed_chunks(chunks).await;

        let document = Document {
            id: Uuid::new_v4(),
            title: title.to_string(),
            doc_type,
            content: content.to_string(),
            filename: filename.map(str::to_string),
            chunk_count: embedded.len() as i32,
            uploaded_at: Utc::now(),
        };
        self.documents.create_document(&document).await?;

        let records: Vec<DocumentChunk> = embedded
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| DocumentChunk {
                id: chunk_id(document.id, i),
                text: chunk.text,
                embedding: chunk.vector,
                metadata: ChunkMetadata {
                    document_id: document.id,
                    document_title: document.title.clone(),
                    document_type: document.doc_type,
                    chunk_index: i,
                    uploaded_at: document.uploaded_at,
                },
            })
            .collect();

        if let Err(e) = self.index.add(records).await {
            // Keep the document table and the index in step.
            if let Err(cleanup) = self.documents.delete_document(document.id).await {
                tracing::error!("Failed to roll back document {}: {}", document.id, cleanup);
            }
            return Err(IngestError::Internal(e));
        }

        tracing::info!(
            "Ingested \"{}\" ({}) as {} chunks",
            document.title,
            document.id,
            document.chunk_count
        );

        let event = IngestionCompleteEvent {
            document_id: document.id,
            title: document.title.clone(),
            doc_type: document.doc_type,
            chunk_count: document.chunk_count,
            timestamp: Utc::now(),
        };
        if let Err(e) = publish_event(self.publisher.as_ref(), INGESTION_COMPLETE, &event).await {
            tracing::error!("Failed to publish ingestion event for {}: {}", document.id, e);
        }

        Ok(IngestReply {
            document_id: document.id,
            title: document.title,
            chunk_count: document.chunk_count,
        })
    }

    /// Extracts the text of an uploaded PDF and ingests it.
    pub async fn ingest_pdf(
        &self,
        title: &str,
        bytes: Vec<u8>,
        filename: Option<&str>,
    ) -> Result<IngestReply, IngestError> {
        let extracted = tokio::task::spawn_blocking(move || extractor::extract_pdf_bytes(&bytes))
            .await
            .map_err(|e| anyhow::anyhow!("PDF extraction task failed: {}", e));

        let text = match extracted {
            Ok(Ok(text)) if !text.trim().is_empty() => text,
            Ok(Ok(_)) => {
                return Err(IngestError::Validation("PDF contains no extractable text".to_string()))
            }
            Ok(Err(e)) | Err(e) => {
                tracing::warn!("Unreadable PDF upload: {}", e);
                return Err(IngestError::Validation("Could not read PDF file".to_string()));
            }
        };

        self.ingest(title, DocumentType::Pdf, &text, filename).await
    }

    /// One embedding per chunk, in chunk order. A chunk whose embedding fails
    /// for good gets a zero vector so the document still lands in full.
    pub async fn embed_chunks(&self, chunks: Vec<String>) -> Vec<EmbeddedChunk> {
        let mut embedded = Vec::with_capacity(chunks.len());

        for (i, text) in chunks.into_iter().enumerate() {
            let vector = match self
                .settings
                .retry
                .run(|| self.embeddings.embed(&text))
                .await
            {
                Ok(vector) => vector,
                Err(e) => {
                    tracing::error!("Embedding failed for chunk {}, using zero vector: {}", i, e);
                    vec![0.0; self.embeddings.dims()]
                }
            };
            embedded.push(EmbeddedChunk { text, vector });
        }

        embedded
    }

    /// Removes the document's chunks from the vector index, then its row.
    /// The row goes last so a failed index delete can be retried.
    pub async fn delete_document(&self, id: Uuid) -> Result<(), IngestError> {
        if self.documents.get_document(id).await?.is_none() {
            return Err(IngestError::NotFound(id));
        }

        self.index.delete_document(id).await?;
        if !self.documents.delete_document(id).await? {
            return Err(IngestError::NotFound(id));
        }
        tracing::info!("Deleted document {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::error::ProviderError;
    use crate::queue::memory::MemoryQueue;
    use crate::rag::vector_store::MemoryIndex;
    use crate::store::memory::MemoryStore;

    /// Fails every `fail_every`-th call with a non-retryable error.
    struct CountingEmbedder {
        calls: AtomicUsize,
        fail_every: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        fn dims(&self) -> usize {
            3
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Err(ProviderError::Api { status: 500, body: "boom".into() });
            }
            Ok(vec![1.0, 0.5, 0.25])
        }
    }

    struct Fixture {
        ingestor: Ingestor,
        index: Arc<MemoryIndex>,
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
    }

    fn fixture(fail_every: usize) -> Fixture {
        let index = Arc::new(MemoryIndex::new());
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let ingestor = Ingestor::new(
            Arc::new(CountingEmbedder { calls: AtomicUsize::new(0), fail_every }),
            index.clone(),
            store.clone(),
            queue.clone(),
            IngestSettings {
                chunk_size: 10,
                overlap: 2,
                ..IngestSettings::default()
            },
        );
        Fixture { ingestor, index, store, queue }
    }

    #[tokio::test]
    async fn test_ingest_persists_indexes_and_announces() {
        let f = fixture(0);
        let reply = f
            .ingestor
            .ingest("Library hours", DocumentType::Text, "The library opens at 8am daily.", None)
            .await
            .unwrap();

        assert_eq!(reply.chunk_count, 4);
        assert_eq!(f.index.len().await, 4);

        let doc = f.store.get_document(reply.document_id).await.unwrap().unwrap();
        assert_eq!(doc.chunk_count, 4);

        let events = f.queue.pending(INGESTION_COMPLETE).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["title"], "Library hours");
        assert_eq!(events[0]["chunkCount"], 4);
    }

    #[tokio::test]
    async fn test_failed_embedding_falls_back_to_zero_vector() {
        let f = fixture(2);
        let embedded = f
            .ingestor
            .embed_chunks(vec!["a".into(), "b".into(), "c".into()])
            .await;

        assert_eq!(embedded.len(), 3);
        assert_eq!(embedded[0].vector, vec![1.0, 0.5, 0.25]);
        assert_eq!(embedded[1].text, "b");
        assert_eq!(embedded[1].vector, vec![0.0, 0.0, 0.0]);
        assert_eq!(embedded[2].vector, vec![1.0, 0.5, 0.25]);
    }

    #[tokio::test]
    async fn test_rejects_blank_input() {
        let f = fixture(0);
        let err = f.ingestor.ingest("  ", DocumentType::Text, "body", None).await.unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));

        let err = f.ingestor.ingest("Title", DocumentType::Text, " \n ", None).await.unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
        assert!(f.store.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_cascades_to_index() {
        let f = fixture(0);
        let reply = f
            .ingestor
            .ingest("Fees", DocumentType::Text, "Tuition is due in August.", None)
            .await
            .unwrap();

        f.ingestor.delete_document(reply.document_id).await.unwrap();
        assert!(f.index.is_empty().await);
        assert!(f.store.get_document(reply.document_id).await.unwrap().is_none());

        let err = f.ingestor.delete_document(reply.document_id).await.unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }

    /// Memory index whose first `delete_document` call fails.
    struct FlakyDeleteIndex {
        inner: MemoryIndex,
        failed_once: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl VectorIndex for FlakyDeleteIndex {
        async fn add(&self, chunks: Vec<DocumentChunk>) -> anyhow::Result<()> {
            self.inner.add(chunks).await
        }

        async fn query(
            &self,
            embedding: &[f32],
            k: usize,
        ) -> anyhow::Result<crate::rag::vector_store::QueryResult> {
            self.inner.query(embedding, k).await
        }

        async fn delete_document(&self, document_id: Uuid) -> anyhow::Result<()> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                anyhow::bail!("index unavailable");
            }
            self.inner.delete_document(document_id).await
        }
    }

    #[tokio::test]
    async fn test_failed_index_delete_can_be_retried() {
        let index = Arc::new(FlakyDeleteIndex {
            inner: MemoryIndex::new(),
            failed_once: std::sync::atomic::AtomicBool::new(false),
        });
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(
            Arc::new(CountingEmbedder { calls: AtomicUsize::new(0), fail_every: 0 }),
            index.clone(),
            store.clone(),
            Arc::new(MemoryQueue::new()),
            IngestSettings::default(),
        );
        let reply = ingestor
            .ingest("Parking", DocumentType::Text, "Permits cost $80 per term.", None)
            .await
            .unwrap();

        let err = ingestor.delete_document(reply.document_id).await.unwrap_err();
        assert!(matches!(err, IngestError::Internal(_)));
        assert!(store.get_document(reply.document_id).await.unwrap().is_some());

        ingestor.delete_document(reply.document_id).await.unwrap();
        assert!(index.inner.is_empty().await);
        assert!(store.get_document(reply.document_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_pdf_is_a_validation_error() {
        let f = fixture(0);
        let err = f
            .ingestor
            .ingest_pdf("Scan", b"not a pdf".to_vec(), Some("scan.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[test]
    fn test_chunk_id_format() {
        let id = Uuid::nil();
        assert_eq!(chunk_id(id, 3), format!("{}_chunk_3", id));
    }
}
