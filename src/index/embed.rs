//! Embedding seam for the retrieval index
//!
//! The embedding model is an external collaborator: a pure
//! `encode(texts) -> vectors` function behind the [`Embedder`] trait.
//! The bundled implementation calls an OpenAI-compatible `/embeddings`
//! endpoint; tests substitute deterministic doubles.

use crate::error::{CampfireError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// External embedding model
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Encode a batch of texts into fixed-dimension vectors.
    ///
    /// Implementations must return one vector per input, each of
    /// [`Embedder::dim`] components, in input order.
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector dimensionality (D)
    fn dim(&self) -> usize;

    /// Identifier recorded in cache metadata
    fn model_id(&self) -> &str;
}

/// Normalize a vector to unit L2 length in place, so that inner product
/// equals cosine similarity. Zero vectors are left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model_id: String,
    dim: usize,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    /// Create an embedder against `base_url` (e.g.
    /// `http://localhost:11434/v1`).
    pub fn new(base_url: &str, api_key: &str, model_id: &str, dim: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| CampfireError::Upstream(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            dim,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsRequest {
                model: &self.model_id,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| CampfireError::Upstream(format!("embeddings request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CampfireError::Upstream(format!(
                "embeddings endpoint returned {}: {}",
                status, body
            ))
            .into());
        }

        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| {
            CampfireError::Upstream(format!("failed to parse embeddings response: {}", e))
        })?;

        if parsed.data.len() != texts.len() {
            return Err(CampfireError::Upstream(format!(
                "embeddings endpoint returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            ))
            .into());
        }

        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);
        let mut vectors = Vec::with_capacity(items.len());
        for item in items {
            if item.embedding.len() != self.dim {
                return Err(CampfireError::Upstream(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dim,
                    item.embedding.len()
                ))
                .into());
            }
            vectors.push(item.embedding);
        }
        Ok(vectors)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
