pub mod embeddings;
pub mod marker;
pub mod prompt;
pub mod vector_store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::cache::{cache_key, ResponseCache, DEFAULT_TTL};
use crate::generation::GenerationProvider;
use crate::models::ChunkMetadata;
use crate::retry::RetryPolicy;
use self::embeddings::EmbeddingProvider;
use self::marker::strip_escalation_marker;
use self::prompt::build_prompt;
use self::vector_store::VectorIndex;

/// Returned when generation fails for good. Never cached.
pub const FALLBACK_RESPONSE: &str = "I apologize, but I'm having trouble processing your question \
     right now. Please try again or escalate this to an administrator.";

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub top_k: usize,
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            cache_ttl: DEFAULT_TTL,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    pub response: String,
    pub should_escalate: bool,
    pub sources: Vec<ChunkMetadata>,
    pub from_cache: bool,
}

/// Chunks retrieved for one query, joined into the prompt context.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub context: String,
    pub sources: Vec<ChunkMetadata>,
}

impl Retrieval {
    pub fn has_context(&self) -> bool {
        !self.context.is_empty()
    }
}

pub struct RAGEngine {
    embeddings: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorIndex>,
    generator: Arc<dyn GenerationProvider>,
    cache: Arc<dyn ResponseCache>,
    settings: RagSettings,
}

impl RAGEngine {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorIndex>,
        generator: Arc<dyn GenerationProvider>,
        cache: Arc<dyn ResponseCache>,
        settings: RagSettings,
    ) -> Self {
        Self {
            embeddings,
            vector_store,
            generator,
            cache,
            settings,
        }
    }

    /// Answers one user query.
    ///
    /// Cached answers are returned as-is and never re-evaluated for escalation.
    /// On a miss the query is embedded, the nearest chunks are retrieved and
    /// the answer is generated and cached. Retrieval, cache and generation
    /// failures are absorbed here; the caller always gets an outcome.
    pub async fn process_query(&self, query: &str) -> QueryOutcome {
        let key = cache_key(query);

        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                tracing::debug!("Cache hit for {}", key);
                return QueryOutcome {
                    response: cached,
                    should_escalate: false,
                    sources: Vec::new(),
                    from_cache: true,
                };
            }
            Ok(None) => tracing::debug!("Cache miss for {}", key),
            Err(e) => tracing::error!("Cache lookup failed (continuing without cache): {}", e),
        }

        let retrieval = self.retrieve_context(query).await;
        let prompt = build_prompt(query, &retrieval.context);

        let generated = self
            .settings
            .retry
            .run(|| self.generator.generate(&prompt))
            .await;

        let generated = match generated {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Generation failed: {}", e);
                return QueryOutcome {
                    response: FALLBACK_RESPONSE.to_string(),
                    should_escalate: true,
                    sources: Vec::new(),
                    from_cache: false,
                };
            }
        };

        let (response, should_escalate) = strip_escalation_marker(&generated);

        if let Err(e) = self.cache.set(&key, &response, self.settings.cache_ttl).await {
            tracing::error!("Failed to cache response: {}", e);
        }

        let sources = if retrieval.has_context() {
            retrieval.sources
        } else {
            Vec::new()
        };

        QueryOutcome {
            response,
            should_escalate,
            sources,
            from_cache: false,
        }
    }

    /// Embeds the raw query and fetches the `top_k` nearest chunks. Any
    /// failure degrades to an empty context.
    pub async fn retrieve_context(&self, query: &str) -> Retrieval {
        match self.try_retrieve(query).await {
            Ok(retrieval) => retrieval,
            Err(e) => {
                tracing::warn!("Retrieval failed, answering without context: {}", e);
                Retrieval::default()
            }
        }
    }

    async fn try_retrieve(&self, query: &str) -> Result<Retrieval> {
        let query_embedding = self.embeddings.embed(query).await?;
        let results = self
            .vector_store
            .query(&query_embedding, self.settings.top_k)
            .await?;

        if results.is_empty() {
            return Ok(Retrieval::default());
        }

        let documents = results.documents.into_iter().next().unwrap_or_default();
        let sources = results.metadatas.into_iter().next().unwrap_or_default();

        Ok(Retrieval {
            context: documents.join("\n\n"),
            sources,
        })
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.flush_all().await
    }

    pub async fn generation_healthy(&self) -> bool {
        self.generator.health_check().await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::cache::MemoryCache;
    use crate::error::ProviderError;
    use crate::models::{DocumentChunk, DocumentType};
    use super::vector_store::{MemoryIndex, QueryResult};

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn dims(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        async fn add(&self, _chunks: Vec<DocumentChunk>) -> Result<()> {
            anyhow::bail!("index offline")
        }

        async fn query(&self, _embedding: &[f32], _k: usize) -> Result<QueryResult> {
            anyhow::bail!("index offline")
        }

        async fn delete_document(&self, _document_id: Uuid) -> Result<()> {
            anyhow::bail!("index offline")
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl ResponseCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            anyhow::bail!("cache offline")
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            anyhow::bail!("cache offline")
        }

        async fn flush_all(&self) -> Result<()> {
            anyhow::bail!("cache offline")
        }
    }

    /// Replays scripted replies and records every prompt it sees.
    struct ScriptedGenerator {
        replies: Mutex<Vec<Result<String, ProviderError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(mut replies: Vec<Result<String, ProviderError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ProviderError::InvalidResponse("script exhausted".into())))
        }
    }

    fn engine(index: Arc<dyn VectorIndex>, generator: Arc<ScriptedGenerator>) -> RAGEngine {
        RAGEngine::new(
            Arc::new(FixedEmbedder),
            index,
            generator,
            Arc::new(MemoryCache::new()),
            RagSettings::default(),
        )
    }

    async fn index_with_handbook() -> Arc<MemoryIndex> {
        let index = Arc::new(MemoryIndex::new());
        index
            .add(vec![DocumentChunk {
                id: "doc_chunk_0".to_string(),
                text: "The library opens at 8am.".to_string(),
                embedding: vec![1.0, 0.0],
                metadata: ChunkMetadata {
                    document_id: Uuid::new_v4(),
                    document_title: "Handbook".to_string(),
                    document_type: DocumentType::Text,
                    chunk_index: 0,
                    uploaded_at: Utc::now(),
                },
            }])
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_answer_from_context_returns_sources() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok("It opens at 8am.".into())]));
        let engine = engine(index_with_handbook().await, generator.clone());

        let outcome = engine.process_query("When does the library open?").await;
        assert_eq!(outcome.response, "It opens at 8am.");
        assert!(!outcome.should_escalate);
        assert!(!outcome.from_cache);
        assert_eq!(outcome.sources.len(), 1);
        assert_eq!(outcome.sources[0].document_title, "Handbook");
        assert!(generator.prompts()[0].contains("Context:\nThe library opens at 8am."));
    }

    #[tokio::test]
    async fn test_marker_sets_escalation_and_is_stripped() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(
            "I don't have that information. [ESCALATE]".into(),
        )]));
        let engine = engine(Arc::new(MemoryIndex::new()), generator.clone());

        let outcome = engine.process_query("What is the parking fee?").await;
        assert!(outcome.should_escalate);
        assert!(!outcome.response.contains("[ESCALATE]"));
        assert!(outcome.sources.is_empty());
        assert!(generator.prompts()[0].contains("general greeting"));
    }

    #[tokio::test]
    async fn test_second_identical_query_hits_cache() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok("Sorry. [ESCALATE]".into())]));
        let engine = engine(Arc::new(MemoryIndex::new()), generator.clone());

        let first = engine.process_query("Dorm rules?").await;
        assert!(first.should_escalate);

        let second = engine.process_query("  dorm RULES? ").await;
        assert!(second.from_cache);
        assert!(!second.should_escalate);
        assert_eq!(second.response, "Sorry.");
        assert_eq!(generator.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_index_failure_degrades_to_no_context() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok("Hello!".into())]));
        let engine = engine(Arc::new(BrokenIndex), generator.clone());

        let outcome = engine.process_query("hi").await;
        assert_eq!(outcome.response, "Hello!");
        assert!(outcome.sources.is_empty());
        assert!(generator.prompts()[0].contains("general greeting"));
    }

    #[tokio::test]
    async fn test_cache_outage_still_answers() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("It opens at 8am.".into()),
            Ok("Still 8am.".into()),
        ]));
        let engine = RAGEngine::new(
            Arc::new(FixedEmbedder),
            index_with_handbook().await,
            generator.clone(),
            Arc::new(BrokenCache),
            RagSettings::default(),
        );

        let first = engine.process_query("When does the library open?").await;
        assert_eq!(first.response, "It opens at 8am.");
        assert!(!first.from_cache);
        assert_eq!(first.sources.len(), 1);

        let second = engine.process_query("When does the library open?").await;
        assert_eq!(second.response, "Still 8am.");
        assert!(!second.from_cache);
        assert_eq!(generator.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_generation_failure_returns_fallback_and_is_not_cached() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(ProviderError::Api { status: 500, body: "boom".into() }),
            Ok("Recovered".into()),
        ]));
        let engine = engine(index_with_handbook().await, generator.clone());

        let outcome = engine.process_query("When does the library open?").await;
        assert_eq!(outcome.response, FALLBACK_RESPONSE);
        assert!(outcome.should_escalate);
        assert!(outcome.sources.is_empty());

        let retry = engine.process_query("When does the library open?").await;
        assert!(!retry.from_cache);
        assert_eq!(retry.response, "Recovered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limits_are_retried() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(ProviderError::RateLimited("429".into())),
            Err(ProviderError::RateLimited("429".into())),
            Ok("Third time lucky".into()),
        ]));
        let engine = engine(Arc::new(MemoryIndex::new()), generator.clone());

        let outcome = engine.process_query("hello").await;
        assert_eq!(outcome.response, "Third time lucky");
        assert_eq!(generator.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_query_still_reaches_provider() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok("How can I help?".into())]));
        let engine = engine(Arc::new(MemoryIndex::new()), generator.clone());

        let outcome = engine.process_query("").await;
        assert_eq!(outcome.response, "How can I help?");
        assert_eq!(generator.prompts().len(), 1);
    }
}
