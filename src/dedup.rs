//! Content-hash deduplication and incremental updates.
//!
//! A SHA-256 digest over a file's raw bytes is computed before extraction.
//! The run-scoped [`HashCache`] answers most lookups; a miss costs exactly
//! one indexed count against the store. Unchanged files never reach
//! extraction, chunking, or the embedding provider. The cache is created at
//! run start and discarded at run end; it deliberately does not persist
//! across runs, so the store stays the source of truth.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::store::VectorStore;

/// Hex SHA-256 over raw bytes. The dedup key for a file's content.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Last known indexing status of one path within this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupStatus {
    SkippedUnchanged,
    Indexed,
}

/// Run-scoped dedup state: the set of content hashes known to be indexed,
/// plus a per-path record for reporting. Single-writer under the
/// sequential pipeline; a concurrent pipeline would need to shard or lock
/// this.
#[derive(Default)]
pub struct HashCache {
    indexed_hashes: HashSet<String>,
    by_path: HashMap<String, (String, DedupStatus)>,
}

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this run already knows the hash is indexed (no remote call).
    pub fn contains(&self, hash: &str) -> bool {
        self.indexed_hashes.contains(hash)
    }

    /// Record a successful upload so same-content duplicates later in the
    /// run are skipped without a remote check.
    pub fn mark_indexed(&mut self, path: &str, hash: &str) {
        self.indexed_hashes.insert(hash.to_string());
        self.by_path
            .insert(path.to_string(), (hash.to_string(), DedupStatus::Indexed));
    }

    /// Record a skip decision for reporting.
    pub fn mark_skipped(&mut self, path: &str, hash: &str) {
        self.indexed_hashes.insert(hash.to_string());
        self.by_path.insert(
            path.to_string(),
            (hash.to_string(), DedupStatus::SkippedUnchanged),
        );
    }

    pub fn status(&self, path: &str) -> Option<&(String, DedupStatus)> {
        self.by_path.get(path)
    }

    pub fn len(&self) -> usize {
        self.indexed_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexed_hashes.is_empty()
    }
}

/// Decide whether content with this hash is already indexed.
///
/// Cache first, then a single exact count against the store's hash index.
/// A store error here is logged and treated as "not indexed": processing
/// the file again is safe because upserts are keyed by stable ids.
pub async fn is_already_indexed(
    cache: &HashCache,
    store: &dyn VectorStore,
    collection: &str,
    hash: &str,
) -> bool {
    if cache.contains(hash) {
        return true;
    }

    match store.count_by_hash(collection, hash).await {
        Ok(count) => count > 0,
        Err(e) => {
            tracing::warn!(error = %e, "hash existence check failed, re-indexing");
            false
        }
    }
}
