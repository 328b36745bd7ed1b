//! The `text -> vector` seam and its two implementations: an
//! OpenAI-compatible HTTP client and an offline hashing embedder.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::normalize;

/// Text to embed, with optional per-call overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub text: String,
    /// Overrides the provider's default model.
    pub model: Option<String>,
    /// Requested output size, for models that can shorten their vectors.
    pub dimensions: Option<usize>,
}

impl EmbeddingRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
            dimensions: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embedding: Embedding,
    /// Model that actually produced the vector.
    pub model: String,
    pub dimension: usize,
    /// Billed tokens, when the provider reports them.
    pub tokens_used: Option<u64>,
}

impl EmbeddingResponse {
    fn new(embedding: Embedding, model: impl Into<String>, tokens_used: Option<u64>) -> Self {
        Self {
            dimension: embedding.len(),
            embedding,
            model: model.into(),
            tokens_used,
        }
    }
}

/// Anything that can embed ticket and knowledge text.
///
/// Retrieval and ingestion only depend on this trait, so the network
/// provider, the cache wrapper and the offline embedder are interchangeable.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    /// Vector size produced by [`default_model`](Self::default_model).
    fn default_dimension(&self) -> usize;

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Embed several texts, preserving input order.
    ///
    /// The default embeds one text at a time; providers with a batch
    /// endpoint should override it.
    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            out.push(self.embed(request).await?);
        }
        Ok(out)
    }

    /// Whether a call could succeed at all (e.g. credentials are present).
    fn is_available(&self) -> bool;
}

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_DEFAULT_MODEL: &str = "text-embedding-3-small";
/// Used when a 429 carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Client for any server exposing the OpenAI `POST /embeddings` route.
///
/// The key is read from `OPENAI_API_KEY` by [`OpenAIProvider::new`].
pub struct OpenAIProvider {
    api_key: Option<String>,
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: OPENAI_BASE_URL.to_string(),
            model: OPENAI_DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(10),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call(&self, body: &WireRequest<'_>) -> Result<WireResponse> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(EmbeddingError::ProviderNotConfigured)?;

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(key)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            warn!("Embedding provider rate limited, retry after {retry_after_secs}s");
            return Err(EmbeddingError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiRequest(format!("{status}: {detail}")));
        }

        Ok(response.json().await?)
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn default_dimension(&self) -> usize {
        if self.model == "text-embedding-3-large" {
            3072
        } else {
            1536
        }
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        debug!(model, chars = request.text.len(), "embedding text");

        let reply = self
            .call(&WireRequest {
                input: WireInput::One(&request.text),
                model,
                dimensions: request.dimensions,
            })
            .await?;

        let tokens_used = reply.usage.as_ref().map(|usage| usage.total_tokens);
        let item = reply
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty data array".to_string()))?;
        Ok(EmbeddingResponse::new(item.embedding, reply.model, tokens_used))
    }

    /// One HTTP call for the whole batch. All texts use the model of the
    /// first request.
    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        let Some(first) = requests.first() else {
            return Ok(Vec::new());
        };
        let model = first.model.as_deref().unwrap_or(&self.model);
        let texts: Vec<&str> = requests.iter().map(|r| r.text.as_str()).collect();
        debug!(model, count = texts.len(), "embedding batch");

        let mut reply = self
            .call(&WireRequest {
                input: WireInput::Many(texts),
                model,
                dimensions: first.dimensions,
            })
            .await?;

        if reply.data.len() != requests.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "sent {} texts, received {} vectors",
                requests.len(),
                reply.data.len()
            )));
        }
        reply.data.sort_by_key(|item| item.index);

        Ok(reply
            .data
            .into_iter()
            .map(|item| EmbeddingResponse::new(item.embedding, reply.model.as_str(), None))
            .collect())
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    input: WireInput<'a>,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireInput<'a> {
    One(&'a str),
    Many(Vec<&'a str>),
}

#[derive(Deserialize)]
struct WireResponse {
    data: Vec<WireEmbedding>,
    model: String,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireEmbedding {
    embedding: Embedding,
    #[serde(default)]
    index: usize,
}

#[derive(Deserialize)]
struct WireUsage {
    total_tokens: u64,
}

/// Offline embedder: lowercase words of two or more characters are hashed
/// into `dimension` buckets and the counts are normalized.
///
/// Texts sharing vocabulary end up close, which is all retrieval needs in
/// tests and air-gapped deployments.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimension: usize,
}

impl HashingEmbeddingProvider {
    pub const DEFAULT_DIMENSION: usize = 256;

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Seedless, so vectors persisted by one process match queries
    /// embedded by the next.
    fn bucket(&self, word: &str) -> usize {
        (xxh3_64(word.as_bytes()) % self.dimension as u64) as usize
    }

    /// Synchronous form of [`EmbeddingProvider::embed`].
    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0; self.dimension];
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| word.chars().nth(1).is_some())
            .for_each(|word| vector[self.bucket(word)] += 1.0);
        normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn default_model(&self) -> &str {
        "bag-of-words"
    }

    fn default_dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let words = request.text.split_whitespace().count() as u64;
        Ok(EmbeddingResponse::new(
            self.embed_text(&request.text),
            self.default_model(),
            Some(words),
        ))
    }

    fn is_available(&self) -> bool {
        true
    }
}
