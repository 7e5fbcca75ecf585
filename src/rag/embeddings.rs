use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::ProviderError;

/// Turns text into a fixed-length vector.
///
/// Chunks written at ingestion time and queries embedded at chat time must
/// come from providers with the same `dims()`, otherwise similarity scores are
/// meaningless.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dims(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Prepares the provider ahead of the first request.
    async fn warm_up(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn check_dims(vector: Vec<f32>, dims: usize) -> Result<Vec<f32>, ProviderError> {
    if vector.len() != dims {
        return Err(ProviderError::InvalidResponse(format!(
            "expected {} dimensions, got {}",
            dims,
            vector.len()
        )));
    }
    Ok(vector)
}

// Local ONNX model

/// Runs a sentence-transformer model from local files through fastembed.
///
/// The model is loaded on first use and shared for the life of the process.
/// Concurrent first calls wait on the same load instead of starting their own.
pub struct LocalEmbedder {
    model_dir: PathBuf,
    dims: usize,
    model: OnceCell<Arc<TextEmbedding>>,
}

impl LocalEmbedder {
    pub fn new(model_dir: impl Into<PathBuf>, dims: usize) -> Self {
        Self {
            model_dir: model_dir.into(),
            dims,
            model: OnceCell::new(),
        }
    }

    async fn model(&self) -> Result<Arc<TextEmbedding>, ProviderError> {
        self.model
            .get_or_try_init(|| async {
                let dir = self.model_dir.clone();
                tokio::task::spawn_blocking(move || load_model(&dir))
                    .await
                    .map_err(|e| ProviderError::Init(format!("model loader panicked: {}", e)))?
                    .map(Arc::new)
            })
            .await
            .cloned()
    }
}

fn load_model(model_dir: &Path) -> Result<TextEmbedding, ProviderError> {
    tracing::info!("Loading embedding model from {}", model_dir.display());

    if !model_dir.exists() {
        return Err(ProviderError::Init(format!(
            "Model directory not found: {}",
            model_dir.display()
        )));
    }

    let read = |name: &str| {
        std::fs::read(model_dir.join(name))
            .map_err(|e| ProviderError::Init(format!("Failed to read {}: {}", name, e)))
    };

    let user_model = UserDefinedEmbeddingModel {
        onnx_file: read("model.onnx")?,
        tokenizer_files: TokenizerFiles {
            tokenizer_file: read("tokenizer.json")?,
            config_file: read("config.json")?,
            special_tokens_map_file: read("special_tokens_map.json")?,
            tokenizer_config_file: read("tokenizer_config.json")?,
        },
    };

    let model = TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
        .map_err(|e| ProviderError::Init(format!("Failed to initialize embedding model: {}", e)))?;

    tracing::info!("Embedding model loaded");
    Ok(model)
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    /// Loads the model now instead of on the first request.
    async fn warm_up(&self) -> Result<(), ProviderError> {
        self.model().await.map(|_| ())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let model = self.model().await?;
        let text = text.to_string();

        let vector = tokio::task::spawn_blocking(move || model.embed(vec![text], None))
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("embedding task failed: {}", e)))?
            .map_err(|e| ProviderError::InvalidResponse(format!("local embedding failed: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("empty embedding batch".to_string()))?;

        check_dims(vector, self.dims)
    }
}

// Gemini embedContent

#[derive(Serialize)]
struct EmbedRequest<'a> {
    content: EmbedContent<'a>,
}

#[derive(Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedPart<'a>>,
}

#[derive(Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

/// Calls a Gemini `embedContent` endpoint.
pub struct GeminiEmbedder {
    client: Client,
    api_url: String,
    api_key: String,
    dims: usize,
}

impl GeminiEmbedder {
    pub fn new(api_url: String, api_key: String, dims: usize) -> Self {
        Self {
            client: Client::new(),
            api_url,
            api_key,
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = EmbedRequest {
            content: EmbedContent {
                parts: vec![EmbedPart { text }],
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, error_text));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        check_dims(parsed.embedding.values, self.dims)
    }
}
