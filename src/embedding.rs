//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingClient`] trait and two backends:
//! - **[`OllamaClient`]** — `POST /api/embed` against a local Ollama server.
//! - **[`OpenAiClient`]** — `POST /v1/embeddings`, bearer-authed from the
//!   `OPENAI_API_KEY` environment variable.
//!
//! Providers map transport and HTTP failures into the [`ProviderError`]
//! taxonomy; the batcher decides what is retried, what is bisected, and
//! what becomes a chunk-level failure.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use thiserror::Error;

use crate::config::EmbeddingConfig;

/// Embedding call failure.
///
/// `RateLimited`, `Timeout`, and `Unavailable` are transient and worth
/// retrying with backoff. `ContextOverflow` means the input itself is the
/// problem: retrying the same batch cannot succeed, so the batcher goes
/// straight to bisection.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },
    #[error("embedding request timed out")]
    Timeout,
    #[error("input exceeds provider context window: {0}")]
    ContextOverflow(String),
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::ContextOverflow(_))
    }
}

/// An embedding backend. Stateless over HTTP and safely reusable.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier recorded in point payloads.
    fn model_name(&self) -> &str;
    /// Vector dimensionality the store collection must match.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Instantiate the configured provider.
pub fn create_client(
    config: &EmbeddingConfig,
    dims: usize,
) -> Result<Box<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaClient::new(config, dims)?)),
        "openai" => Ok(Box::new(OpenAiClient::new(config, dims)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Unavailable(e.to_string())
    }
}

/// Classify a non-success HTTP response.
async fn classify_status(resp: reqwest::Response) -> ProviderError {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body: String = resp
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect();

    match status.as_u16() {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(5),
        },
        400 | 413 if mentions_context(&body) => ProviderError::ContextOverflow(body),
        413 => ProviderError::ContextOverflow(body),
        _ => ProviderError::Unavailable(format!("{}: {}", status, body)),
    }
}

fn mentions_context(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("context") || lower.contains("length") || lower.contains("too large")
}

// ============ Ollama ============

/// Embedding client for Ollama's batch `/api/embed` endpoint.
pub struct OllamaClient {
    url: String,
    model: String,
    dims: usize,
    num_ctx: usize,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &EmbeddingConfig, dims: usize) -> Result<Self> {
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims,
            num_ctx: config.token_budget.max(2048),
            client: build_http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "options": { "num_ctx": self.num_ctx },
        });

        let resp = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !resp.status().is_success() {
            return Err(classify_status(resp).await);
        }

        let json: serde_json::Value = resp.json().await.map_err(transport_error)?;
        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                ProviderError::Unavailable("missing embeddings array in response".to_string())
            })?;

        parse_vectors(embeddings, texts.len())
    }
}

// ============ OpenAI ============

/// Embedding client for the OpenAI embeddings API.
pub struct OpenAiClient {
    url: String,
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: &EmbeddingConfig, dims: usize) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims,
            api_key,
            client: build_http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !resp.status().is_success() {
            return Err(classify_status(resp).await);
        }

        let json: serde_json::Value = resp.json().await.map_err(transport_error)?;
        let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
            ProviderError::Unavailable("missing data array in response".to_string())
        })?;

        let values: Vec<serde_json::Value> = data
            .iter()
            .map(|item| item.get("embedding").cloned().unwrap_or(serde_json::Value::Null))
            .collect();
        parse_vectors(&values, texts.len())
    }
}

fn parse_vectors(
    raw: &[serde_json::Value],
    expected: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    if raw.len() != expected {
        return Err(ProviderError::Unavailable(format!(
            "provider returned {} vectors for {} inputs",
            raw.len(),
            expected
        )));
    }

    let mut vectors = Vec::with_capacity(raw.len());
    for value in raw {
        let arr = value.as_array().ok_or_else(|| {
            ProviderError::Unavailable("malformed embedding in response".to_string())
        })?;
        let vec: Vec<f32> = arr
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        vectors.push(vec);
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_by_variant() {
        assert!(ProviderError::RateLimited { retry_after_secs: 5 }.is_retryable());
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::Unavailable("503".to_string()).is_retryable());
        assert!(!ProviderError::ContextOverflow("too long".to_string()).is_retryable());
    }

    #[test]
    fn parse_vectors_checks_arity() {
        let raw = vec![serde_json::json!([0.1, 0.2])];
        assert!(parse_vectors(&raw, 2).is_err());
        let parsed = parse_vectors(&raw, 1).unwrap();
        assert_eq!(parsed, vec![vec![0.1f32, 0.2f32]]);
    }

    #[test]
    fn parse_vectors_rejects_non_arrays() {
        let raw = vec![serde_json::json!("oops")];
        assert!(parse_vectors(&raw, 1).is_err());
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let config = EmbeddingConfig {
            provider: "bedrock".to_string(),
            ..Default::default()
        };
        assert!(create_client(&config, 768).is_err());
    }

    #[test]
    fn ollama_client_reports_model_and_dims() {
        let config = EmbeddingConfig::default();
        let client = OllamaClient::new(&config, 768).unwrap();
        assert_eq!(client.model_name(), "nomic-embed-text");
        assert_eq!(client.dims(), 768);
    }
}
