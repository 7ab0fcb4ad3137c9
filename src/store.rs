//! Vector store abstraction and backends.
//!
//! The [`VectorStore`] trait covers the four operations the pipeline needs:
//! idempotent collection bootstrap, a secondary index on the dedup hash
//! field, an O(1) existence count by hash, and batched upsert keyed by a
//! stable point id. [`QdrantStore`] talks to the Qdrant REST API over
//! reqwest; [`MemoryStore`] backs the pipeline tests.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::StoreConfig;

/// Payload field carrying the file content hash; indexed for dedup counts.
pub const HASH_FIELD: &str = "file_hash";

/// Store-level failure.
///
/// `Unavailable` is retryable; `Conflict` and `InvalidPayload` are not.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
    #[error("vector store conflict: {0}")]
    Conflict(String),
    #[error("vector store rejected payload: {0}")]
    InvalidPayload(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Payload persisted alongside each vector.
///
/// Wire-compatible with retrieval consumers; `_type` is the discriminator
/// legacy consumers require.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PointPayload {
    #[serde(rename = "_type")]
    pub doc_type: &'static str,
    pub text: String,
    pub source_path: String,
    pub title: String,
    pub timestamp: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub semantic_block_index: usize,
    pub token_count: usize,
    pub chunking_method: &'static str,
    pub embedding_model: String,
    pub file_hash: String,
}

/// Discriminator value for document chunks.
pub const DOC_TYPE_CHUNK: &str = "DocumentChunk";

/// The durable unit written to the store.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexedPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

impl IndexedPoint {
    /// Stable id derived from the source path and chunk index, so
    /// re-indexing a changed file overwrites its prior points instead of
    /// duplicating them.
    pub fn stable_id(source_path: &str, chunk_index: usize) -> Uuid {
        let key = format!("{}:{}", source_path, chunk_index);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
    }
}

/// Abstract vector store backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if it does not exist. Idempotent.
    async fn ensure_collection(
        &self,
        name: &str,
        dim: usize,
        metric: &str,
    ) -> Result<(), StoreError>;

    /// Create a keyword index on a payload field if missing. Idempotent.
    /// Required so [`count_by_hash`](VectorStore::count_by_hash) stays an
    /// indexed count rather than a collection scan.
    async fn ensure_hash_index(&self, name: &str, field: &str) -> Result<(), StoreError>;

    /// Exact count of points whose hash field equals `hash`.
    async fn count_by_hash(&self, name: &str, hash: &str) -> Result<u64, StoreError>;

    /// Insert or overwrite points by id.
    async fn upsert(&self, name: &str, points: &[IndexedPoint]) -> Result<(), StoreError>;
}

/// Upsert with exponential backoff on retryable failures.
pub async fn upsert_with_retry(
    store: &dyn VectorStore,
    name: &str,
    points: &[IndexedPoint],
    max_retries: u32,
) -> Result<(), StoreError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(attempt, delay_secs = delay.as_secs(), "retrying upsert");
            tokio::time::sleep(delay).await;
        }
        match store.upsert(name, points).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() => last_err = Some(e),
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| StoreError::Unavailable("upsert failed".to_string())))
}

// ============ Qdrant backend ============

/// Qdrant over its REST API.
pub struct QdrantStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl QdrantStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            req = req.header("api-key", key);
        }
        req
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, StoreError> {
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Unavailable("request timed out".to_string())
            } else {
                StoreError::Unavailable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            400 | 422 => StoreError::InvalidPayload(format!("{}: {}", status, truncate(&body))),
            409 => StoreError::Conflict(truncate(&body)),
            _ => StoreError::Unavailable(format!("{}: {}", status, truncate(&body))),
        })
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(
        &self,
        name: &str,
        dim: usize,
        metric: &str,
    ) -> Result<(), StoreError> {
        let path = format!("/collections/{}", name);
        let exists = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .status()
            .is_success();

        if exists {
            tracing::debug!(collection = name, "collection already exists");
            return Ok(());
        }

        tracing::info!(collection = name, dim, metric, "creating collection");
        let body = serde_json::json!({
            "vectors": { "size": dim, "distance": metric }
        });
        self.send(self.request(reqwest::Method::PUT, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn ensure_hash_index(&self, name: &str, field: &str) -> Result<(), StoreError> {
        let body = serde_json::json!({
            "field_name": field,
            "field_schema": "keyword"
        });
        let result = self
            .send(
                self.request(reqwest::Method::PUT, &format!("/collections/{}/index", name))
                    .json(&body),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            // An index that already exists is the desired end state.
            Err(StoreError::Conflict(_)) => Ok(()),
            Err(StoreError::InvalidPayload(msg)) if msg.contains("already exists") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn count_by_hash(&self, name: &str, hash: &str) -> Result<u64, StoreError> {
        let body = serde_json::json!({
            "filter": {
                "must": [{ "key": HASH_FIELD, "match": { "value": hash } }]
            },
            "exact": true
        });
        let resp = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{}/points/count", name),
                )
                .json(&body),
            )
            .await?;

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(json
            .get("result")
            .and_then(|r| r.get("count"))
            .and_then(|c| c.as_u64())
            .unwrap_or(0))
    }

    async fn upsert(&self, name: &str, points: &[IndexedPoint]) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }
        let body = serde_json::json!({ "points": points });
        self.send(
            self.request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", name),
            )
            .json(&body),
        )
        .await?;
        tracing::debug!(collection = name, points = points.len(), "upserted");
        Ok(())
    }
}

// ============ In-memory backend ============

struct MemoryCollection {
    dim: usize,
    hash_indexed: bool,
    points: HashMap<Uuid, IndexedPoint>,
}

/// In-memory store for pipeline tests. Counting by hash is a linear scan
/// here; the trait contract only requires the remote backend to index it.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    upsert_calls: RwLock<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point_count(&self, name: &str) -> usize {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .map(|c| c.points.len())
            .unwrap_or(0)
    }

    pub fn upsert_calls(&self) -> u64 {
        *self.upsert_calls.read().unwrap()
    }

    pub fn points(&self, name: &str) -> Vec<IndexedPoint> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .map(|c| c.points.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(
        &self,
        name: &str,
        dim: usize,
        _metric: &str,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().unwrap();
        collections.entry(name.to_string()).or_insert(MemoryCollection {
            dim,
            hash_indexed: false,
            points: HashMap::new(),
        });
        Ok(())
    }

    async fn ensure_hash_index(&self, name: &str, _field: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.write().unwrap();
        match collections.get_mut(name) {
            Some(c) => {
                c.hash_indexed = true;
                Ok(())
            }
            None => Err(StoreError::Unavailable(format!(
                "collection {} does not exist",
                name
            ))),
        }
    }

    async fn count_by_hash(&self, name: &str, hash: &str) -> Result<u64, StoreError> {
        let collections = self.collections.read().unwrap();
        Ok(collections
            .get(name)
            .map(|c| {
                if !c.hash_indexed {
                    tracing::trace!(collection = name, "counting hashes without an index");
                }
                c.points
                    .values()
                    .filter(|p| p.payload.file_hash == hash)
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn upsert(&self, name: &str, points: &[IndexedPoint]) -> Result<(), StoreError> {
        *self.upsert_calls.write().unwrap() += 1;
        let mut collections = self.collections.write().unwrap();
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StoreError::Unavailable(format!("collection {} does not exist", name)))?;
        for point in points {
            if point.vector.len() != collection.dim {
                return Err(StoreError::InvalidPayload(format!(
                    "vector dimension {} does not match collection dimension {}",
                    point.vector.len(),
                    collection.dim
                )));
            }
            collection.points.insert(point.id, point.clone());
        }
        Ok(())
    }
}
