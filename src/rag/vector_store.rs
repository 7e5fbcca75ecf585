use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{ChunkMetadata, DocumentChunk};

/// Nearest-neighbour results, wrapped one level per query vector. Callers that
/// issue a single query read index `[0]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub documents: Vec<Vec<String>>,
    pub metadatas: Vec<Vec<ChunkMetadata>>,
    pub distances: Vec<Vec<f32>>,
}

impl QueryResult {
    fn single(hits: Vec<(String, ChunkMetadata, f32)>) -> Self {
        let mut documents = Vec::with_capacity(hits.len());
        let mut metadatas = Vec::with_capacity(hits.len());
        let mut distances = Vec::with_capacity(hits.len());
        for (text, metadata, distance) in hits {
            documents.push(text);
            metadatas.push(metadata);
            distances.push(distance);
        }
        Self {
            documents: vec![documents],
            metadatas: vec![metadatas],
            distances: vec![distances],
        }
    }

    /// True when the first result set is missing or empty.
    pub fn is_empty(&self) -> bool {
        self.documents.first().map_or(true, |docs| docs.is_empty())
    }
}

/// The shared chunk collection: ingestion writes, chat reads.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, chunks: Vec<DocumentChunk>) -> Result<()>;

    /// Returns the `k` nearest chunks, closest first.
    async fn query(&self, embedding: &[f32], k: usize) -> Result<QueryResult>;

    async fn delete_document(&self, document_id: Uuid) -> Result<()>;
}

// Qdrant

pub struct QdrantStore {
    client: Qdrant,
    collection_name: String,
    dims: u64,
}

/// Qdrant only accepts UUID or integer point ids, so chunk ids are mapped onto
/// a stable UUID.
fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

impl QdrantStore {
    pub async fn new(url: &str, collection_name: &str, dims: usize) -> Result<Self> {
        tracing::info!("Building Qdrant client for URL: {}", url);
        let client = Qdrant::from_url(url)
            .build()
            .context("Qdrant client build failed")?;

        let store = Self {
            client,
            collection_name: collection_name.to_string(),
            dims: dims as u64,
        };

        store.ensure_collection().await?;
        tracing::info!("Qdrant collection {} ready", store.collection_name);

        Ok(store)
    }

    async fn ensure_collection(&self) -> Result<()> {
        if !self.client.collection_exists(&self.collection_name).await? {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection_name)
                        .vectors_config(VectorParamsBuilder::new(self.dims, Distance::Cosine)),
                )
                .await?;
        }
        Ok(())
    }
}

fn payload_str(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).cloned()
}

fn metadata_from_payload(payload: &HashMap<String, QdrantValue>) -> Option<ChunkMetadata> {
    Some(ChunkMetadata {
        document_id: Uuid::parse_str(&payload_str(payload, "document_id")?).ok()?,
        document_title: payload_str(payload, "document_title")?,
        document_type: payload_str(payload, "document_type")?.parse().ok()?,
        chunk_index: payload.get("chunk_index")?.as_integer()? as usize,
        uploaded_at: DateTime::parse_from_rfc3339(&payload_str(payload, "uploaded_at")?)
            .ok()?
            .with_timezone(&Utc),
    })
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn add(&self, chunks: Vec<DocumentChunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = chunks
            .into_iter()
            .map(|chunk| {
                let meta = &chunk.metadata;
                let mut payload = JsonMap::new();
                payload.insert("chunk_id".to_string(), JsonValue::String(chunk.id.clone()));
                payload.insert("text".to_string(), JsonValue::String(chunk.text));
                payload.insert("document_id".to_string(), JsonValue::String(meta.document_id.to_string()));
                payload.insert("document_title".to_string(), JsonValue::String(meta.document_title.clone()));
                payload.insert("document_type".to_string(), JsonValue::String(meta.document_type.to_string()));
                payload.insert("chunk_index".to_string(), JsonValue::from(meta.chunk_index as i64));
                payload.insert("uploaded_at".to_string(), JsonValue::String(meta.uploaded_at.to_rfc3339()));
                PointStruct::new(point_id(&chunk.id), chunk.embedding, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points).wait(true))
            .await?;

        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<QueryResult> {
        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection_name, embedding.to_vec(), k as u64)
                    .with_payload(true),
            )
            .await?;

        let mut hits = Vec::new();
        for point in search_result.result {
            let Some(text) = payload_str(&point.payload, "text") else {
                continue;
            };
            let Some(metadata) = metadata_from_payload(&point.payload) else {
                tracing::warn!("Skipping chunk with malformed payload");
                continue;
            };
            // cosine similarity -> distance
            hits.push((text, metadata, 1.0 - point.score));
        }

        Ok(QueryResult::single(hits))
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<()> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection_name)
                    .points(Filter::must([Condition::matches(
                        "document_id",
                        document_id.to_string(),
                    )]))
                    .wait(true),
            )
            .await?;
        Ok(())
    }
}

// In-process index

/// Brute-force cosine index kept in memory. Used for tests and for running the
/// service without a Qdrant instance.
#[derive(Default)]
pub struct MemoryIndex {
    chunks: RwLock<Vec<DocumentChunk>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn add(&self, chunks: Vec<DocumentChunk>) -> Result<()> {
        let mut stored = self.chunks.write().await;
        for chunk in chunks {
            match stored.iter_mut().find(|c| c.id == chunk.id) {
                Some(existing) => *existing = chunk,
                None => stored.push(chunk),
            }
        }
        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<QueryResult> {
        let stored = self.chunks.read().await;
        let mut scored: Vec<(f32, &DocumentChunk)> = stored
            .iter()
            .filter(|c| c.embedding.len() == embedding.len())
            .map(|c| (cosine_distance(embedding, &c.embedding), c))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));

        let hits = scored
            .into_iter()
            .take(k)
            .map(|(distance, c)| (c.text.clone(), c.metadata.clone(), distance))
            .collect();
        Ok(QueryResult::single(hits))
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<()> {
        self.chunks
            .write()
            .await
            .retain(|c| c.metadata.document_id != document_id);
        Ok(())
    }
}
