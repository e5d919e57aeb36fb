//! Embedding provider abstraction and vendor implementations.
//!
//! [`EmbeddingProvider`] is the capability boundary: a provider maps a batch
//! of texts to fixed-dimension vectors, preserving input order 1:1. The
//! provided [`embed`](EmbeddingProvider::embed) method splits arbitrarily
//! large inputs into vendor-safe batches and reassembles the results, so
//! callers never see the batching. Concrete vendors:
//!
//! - **[`OpenAiEmbedder`]** — OpenAI `/v1/embeddings` (`text-embedding-3-small`, 1536).
//! - **[`GiteeEmbedder`]** — Gitee AI Serverless `/api/v1/embeddings`
//!   (`Qwen/Qwen3-Embedding-4B`, 1024); same wire shape as OpenAI.
//!
//! Use [`create_provider`] to resolve a provider tag. Missing credentials
//! and unknown tags fail there, before any network call.
//!
//! Vector helpers ([`vec_to_blob`], [`blob_to_vec`], [`cosine_similarity`])
//! live here too; embeddings are persisted as little-endian f32 BLOBs.
//!
//! # Retry Strategy
//!
//! Transient vendor errors back off exponentially: HTTP 429 and 5xx retry
//! (1s, 2s, 4s, ... capped at 2^5), other 4xx fail immediately, network
//! errors retry. A batch either embeds completely or fails as a whole.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::{Credentials, EmbeddingConfig};

/// Largest batch submitted to a vendor in one request.
const MAX_BATCH: usize = 64;

/// Capability boundary for embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Output vector dimensionality, fixed per provider.
    fn dims(&self) -> usize;

    /// Embed one vendor-sized batch (at most [`MAX_BATCH`] texts).
    /// Implementations must return exactly one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed an arbitrarily large input sequence.
    ///
    /// Splits into vendor-safe batches, reassembles in input order, and
    /// verifies the 1:1 length and dimension contract on every batch; a
    /// short or misshapen vendor response is an error, never a silently
    /// truncated result.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH) {
            let vectors = self.embed_batch(batch).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "Malformed embedding response from {}: {} vectors for {} inputs",
                    self.model_name(),
                    vectors.len(),
                    batch.len()
                );
            }
            for vec in &vectors {
                if vec.len() != self.dims() {
                    bail!(
                        "Malformed embedding response from {}: got {}-dim vector, expected {}",
                        self.model_name(),
                        vec.len(),
                        self.dims()
                    );
                }
            }
            out.extend(vectors);
        }
        Ok(out)
    }

    /// Embed a single query text (e.g. a whole submitted essay).
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Resolve the configured provider tag to a concrete implementation.
///
/// | Config value | Provider |
/// |--------------|----------|
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"gitee"` | [`GiteeEmbedder`] |
///
/// Unknown tags and missing API keys fail here, at construction.
pub fn create_provider(
    config: &EmbeddingConfig,
    credentials: &Credentials,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config, credentials)?)),
        "gitee" => Ok(Box::new(GiteeEmbedder::new(config, credentials)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    endpoint: String,
    max_retries: u32,
    timeout: Duration,
}

impl OpenAiEmbedder {
    const DEFAULT_MODEL: &'static str = "text-embedding-3-small";
    const DEFAULT_DIMS: usize = 1536;
    const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1/embeddings";

    pub fn new(config: &EmbeddingConfig, credentials: &Credentials) -> Result<Self> {
        let api_key = credentials
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY not set (required by the openai embedding provider)")?;

        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            dims: config.dims.unwrap_or(Self::DEFAULT_DIMS),
            api_key,
            endpoint: config
                .base_url
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_ENDPOINT.to_string()),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        post_embeddings(
            &self.endpoint,
            &self.api_key,
            &self.model,
            texts,
            self.max_retries,
            self.timeout,
        )
        .await
    }
}

// ============ Gitee AI (Qwen) ============

pub struct GiteeEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    endpoint: String,
    max_retries: u32,
    timeout: Duration,
}

impl GiteeEmbedder {
    const DEFAULT_MODEL: &'static str = "Qwen/Qwen3-Embedding-4B";
    const DEFAULT_DIMS: usize = 1024;
    const DEFAULT_ENDPOINT: &'static str = "https://ai.gitee.com/api/v1/embeddings";

    pub fn new(config: &EmbeddingConfig, credentials: &Credentials) -> Result<Self> {
        let api_key = credentials
            .gitee_api_key
            .clone()
            .context("GITEE_API_KEY not set (required by the gitee embedding provider)")?;

        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            dims: config.dims.unwrap_or(Self::DEFAULT_DIMS),
            api_key,
            endpoint: config
                .base_url
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_ENDPOINT.to_string()),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for GiteeEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        post_embeddings(
            &self.endpoint,
            &self.api_key,
            &self.model,
            texts,
            self.max_retries,
            self.timeout,
        )
        .await
    }
}

// ============ Shared wire plumbing ============

/// POST an OpenAI-shaped embeddings request with retry/backoff.
async fn post_embeddings(
    endpoint: &str,
    api_key: &str,
    model: &str,
    texts: &[String],
    max_retries: u32,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_embeddings_response(&json);
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "Embedding API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("Embedding API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
}

/// Parse an OpenAI-shaped embeddings response, honoring the per-item
/// `index` field so output order always matches input order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data array"))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
