//! Embedding provider abstraction and the Gemini implementation.
//!
//! The store talks to the embedding service only through the
//! [`EmbeddingProvider`] trait, so tests can inject in-memory fakes and no
//! other module knows about HTTP. Two implementations ship:
//!
//! - [`GeminiProvider`] — calls the Gemini embedding API with batching,
//!   retry, and backoff. The credential is an explicit constructor
//!   argument; this module never reads the environment.
//! - [`DisabledProvider`] — always errors; used by flows that must never
//!   embed (dry-run preview, `info`).
//!
//! Retry strategy for the HTTP provider:
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ...,
//!   capped at 32s)
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//!
//! Also home to the vector utilities shared with the store:
//! [`vec_to_blob`] / [`blob_to_vec`] (little-endian f32 BLOB codec) and
//! [`cosine_similarity`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::Error;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Text-in, fixed-length-vector-out. Batch calls keep input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-004"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of documents for storage. One vector per input text,
    /// in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

// ============ Disabled provider ============

/// Provider used where embedding must not happen. Any embed call fails.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding is disabled for this operation")
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("embedding is disabled for this operation")
    }
}

// ============ Gemini provider ============

/// Embedding provider backed by the Gemini API.
///
/// Documents go through `models/{model}:batchEmbedContents` with task type
/// `RETRIEVAL_DOCUMENT`; queries through `models/{model}:embedContent` with
/// `RETRIEVAL_QUERY`, so stored and query vectors land in the matching
/// embedding spaces.
pub struct GeminiProvider {
    api_key: String,
    model: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Build a provider from an explicit credential and config.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the key is empty or the HTTP client cannot be
    /// constructed.
    pub fn new(api_key: &str, config: &EmbeddingConfig) -> std::result::Result<Self, Error> {
        if api_key.trim().is_empty() {
            return Err(Error::Config(
                "Gemini API key is missing (set GEMINI_API_KEY)".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("could not build HTTP client: {}", e)))?;

        Ok(Self {
            api_key: api_key.trim().to_string(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            client,
        })
    }

    async fn post_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!(
                            "Gemini API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Other client errors (bad key, bad model) won't heal
                    bail!("Gemini API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/models/{}:batchEmbedContents",
            GEMINI_API_BASE, self.model
        );
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": format!("models/{}", self.model),
                    "content": { "parts": [{ "text": text }] },
                    "taskType": "RETRIEVAL_DOCUMENT",
                })
            })
            .collect();
        let body = serde_json::json!({ "requests": requests });

        let json = self.post_with_retry(&url, &body).await?;
        let embeddings = parse_batch_response(&json)?;

        if embeddings.len() != texts.len() {
            bail!(
                "Gemini returned {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            );
        }

        Ok(embeddings)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/models/{}:embedContent", GEMINI_API_BASE, self.model);
        let body = serde_json::json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
            "taskType": "RETRIEVAL_QUERY",
        });

        let json = self.post_with_retry(&url, &body).await?;
        parse_single_response(&json)
    }
}

/// Parse a `batchEmbedContents` response: `embeddings[].values`.
fn parse_batch_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid Gemini response: missing embeddings array"))?;

    data.iter().map(parse_values).collect()
}

/// Parse an `embedContent` response: `embedding.values`.
fn parse_single_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("embedding")
        .ok_or_else(|| anyhow::anyhow!("invalid Gemini response: missing embedding"))?;
    parse_values(embedding)
}

fn parse_values(embedding: &serde_json::Value) -> Result<Vec<f32>> {
    let values = embedding
        .get("values")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid Gemini response: missing values"))?;

    Ok(values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`] back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Empty or length-mismatched inputs
/// score `0.0`.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let vec = vec![0.25f32, -1.5, 3.125, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn blob_length_is_four_bytes_per_dim() {
        assert_eq!(vec_to_blob(&[1.0, 2.0, 3.0]).len(), 12);
    }

    #[test]
    fn cosine_bounds() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);

        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);

        let c = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn parses_batch_response_shape() {
        let json = serde_json::json!({
            "embeddings": [
                { "values": [0.1, 0.2] },
                { "values": [0.3, 0.4] }
            ]
        });
        let out = parse_batch_response(&json).unwrap();
        assert_eq!(out.len(), 2);
        assert!((out[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn parses_single_response_shape() {
        let json = serde_json::json!({ "embedding": { "values": [1.0, -1.0] } });
        let out = parse_single_response(&json).unwrap();
        assert_eq!(out, vec![1.0, -1.0]);
    }

    #[test]
    fn rejects_malformed_responses() {
        assert!(parse_batch_response(&serde_json::json!({})).is_err());
        assert!(parse_single_response(&serde_json::json!({"embedding": {}})).is_err());
    }

    #[test]
    fn empty_key_is_a_config_error() {
        let config = crate::config::EmbeddingConfig::default();
        assert!(GeminiProvider::new("", &config).is_err());
        assert!(GeminiProvider::new("   ", &config).is_err());
        assert!(GeminiProvider::new("test-key", &config).is_ok());
    }
}
