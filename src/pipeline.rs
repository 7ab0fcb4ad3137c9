//! Ingestion pipeline orchestration.
//!
//! Drives the full flow for one run: scan → dedup check → extraction →
//! normalization → chunking → validation → batched embedding → batched
//! upsert, accumulating [`RunStats`]. Files are processed sequentially and
//! one at a time; the embedding provider is sensitive to overlapping batch
//! submissions, and the sequential model keeps the dedup cache
//! single-writer. File-level failures never abort the run; only store
//! bootstrap failures do.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::batch::{embed_chunks, ChunkEmbedding};
use crate::chunk::chunk_document;
use crate::config::{ChunkStrategy, Config};
use crate::dedup::{hash_bytes, is_already_indexed, HashCache};
use crate::embedding::EmbeddingClient;
use crate::extract::{ensure_within_size, extract_with_timeout, ExtractionCoordinator};
use crate::models::{FileState, SourceDocument};
use crate::normalize::{clean_text, validate_text_quality};
use crate::progress::{FilePhase, ProgressReporter};
use crate::report::RunStats;
use crate::scan::scan_directory;
use crate::store::{
    upsert_with_retry, IndexedPoint, PointPayload, VectorStore, DOC_TYPE_CHUNK, HASH_FIELD,
};

/// Minimum characters of cleaned text worth chunking.
const MIN_DOCUMENT_CHARS: usize = 100;

/// Cooperative cancellation at file granularity: the file in flight
/// finishes (or fails) before the run stops, so no partial uploads are
/// left behind.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Record a state transition for tracing and keep the current state in
/// sync. Terminal states end the file's journey, so nothing may leave one.
fn advance(doc: &SourceDocument, state: &mut FileState, to: FileState) {
    debug_assert!(
        !state.is_terminal(),
        "transition out of terminal state {:?}",
        state
    );
    *state = to;
    tracing::trace!(path = %doc.relative_path, state = ?to, terminal = to.is_terminal(), "file state");
}

enum FileOutcome {
    Skipped,
    Processed {
        uploaded: usize,
        failed_chunks: usize,
    },
    Failed(String),
}

/// One ingestion run over a directory tree.
pub struct Pipeline<'a> {
    config: &'a Config,
    store: &'a dyn VectorStore,
    embedder: &'a dyn EmbeddingClient,
    progress: &'a dyn ProgressReporter,
    cancel: CancelFlag,
    strategy: ChunkStrategy,
    coordinator: Arc<ExtractionCoordinator>,
    cache: HashCache,
}

impl<'a> Pipeline<'a> {
    /// Resolve run-wide decisions (chunking tier) once, up front, so every
    /// file in the run behaves the same way.
    pub fn new(
        config: &'a Config,
        store: &'a dyn VectorStore,
        embedder: &'a dyn EmbeddingClient,
        progress: &'a dyn ProgressReporter,
        cancel: CancelFlag,
    ) -> Result<Self> {
        let strategy = config.chunking.resolve_strategy()?;
        if strategy != ChunkStrategy::Semantic {
            tracing::warn!(tier = strategy.as_str(), "chunking degraded below semantic tier");
        }

        Ok(Self {
            config,
            store,
            embedder,
            progress,
            cancel,
            strategy,
            coordinator: Arc::new(ExtractionCoordinator::new()),
            cache: HashCache::new(),
        })
    }

    /// Idempotently prepare the destination collection and its hash index.
    /// Failure here is run-fatal: nothing can be indexed without it.
    pub async fn bootstrap(&self) -> Result<()> {
        if self.embedder.dims() != self.config.store.vector_dim {
            anyhow::bail!(
                "embedding model dims {} do not match store.vector_dim {}",
                self.embedder.dims(),
                self.config.store.vector_dim
            );
        }

        let store_cfg = &self.config.store;
        self.store
            .ensure_collection(
                &store_cfg.collection,
                store_cfg.vector_dim,
                &store_cfg.distance,
            )
            .await
            .with_context(|| format!("failed to ensure collection '{}'", store_cfg.collection))?;
        self.store
            .ensure_hash_index(&store_cfg.collection, HASH_FIELD)
            .await
            .with_context(|| {
                format!(
                    "failed to ensure hash index on '{}.{}'",
                    store_cfg.collection, HASH_FIELD
                )
            })?;
        Ok(())
    }

    /// Process every file under `root` and return the run statistics.
    pub async fn run(&mut self, root: &Path) -> Result<RunStats> {
        let started = Instant::now();
        self.bootstrap().await?;

        let documents = scan_directory(&self.config.scan, root)?;

        let mut stats = RunStats {
            files_total: documents.len(),
            ..Default::default()
        };

        let total = documents.len() as u64;
        for (i, doc) in documents.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(
                    remaining = documents.len() - i,
                    "cancellation requested, stopping before next file"
                );
                break;
            }

            let n = (i + 1) as u64;
            stats.bytes_scanned += doc.size;

            match self.process_file(doc, n, total, &mut stats).await {
                FileOutcome::Skipped => {
                    stats.files_skipped += 1;
                }
                FileOutcome::Processed {
                    uploaded,
                    failed_chunks,
                } => {
                    stats.files_processed += 1;
                    stats.chunks_created += uploaded;
                    stats.chunks_failed += failed_chunks;
                }
                FileOutcome::Failed(reason) => {
                    tracing::warn!(path = %doc.relative_path, reason = %reason, "file failed");
                    self.progress.report(
                        &doc.path,
                        n,
                        total,
                        &FilePhase::Failed {
                            reason: reason.clone(),
                        },
                    );
                    stats.record_failure(&doc.relative_path, reason);
                }
            }
        }

        stats.duration = started.elapsed();
        tracing::info!(
            processed = stats.files_processed,
            skipped = stats.files_skipped,
            failed = stats.files_failed,
            chunks = stats.chunks_created,
            "run finished"
        );
        Ok(stats)
    }

    /// Walk one file through the state machine. Every failure is file
    /// scoped; the returned outcome carries the terminal state.
    async fn process_file(
        &mut self,
        doc: &SourceDocument,
        n: u64,
        total: u64,
        stats: &mut RunStats,
    ) -> FileOutcome {
        let mut state = FileState::Discovered;

        // Oversized files are refused before any bytes are read.
        if let Err(e) = ensure_within_size(doc.size, self.config.extraction.max_file_size) {
            return FileOutcome::Failed(e.to_string());
        }

        self.progress.report(&doc.path, n, total, &FilePhase::Hashing);
        let bytes = match std::fs::read(&doc.path) {
            Ok(bytes) => bytes,
            Err(e) => return FileOutcome::Failed(format!("file unreadable: {}", e)),
        };
        let file_hash = hash_bytes(&bytes);
        advance(doc, &mut state, FileState::HashComputed);

        if is_already_indexed(&self.cache, self.store, &self.config.store.collection, &file_hash)
            .await
        {
            self.cache.mark_skipped(&doc.relative_path, &file_hash);
            advance(doc, &mut state, FileState::SkippedUnchanged);
            self.progress
                .report(&doc.path, n, total, &FilePhase::SkippedUnchanged);
            tracing::debug!(path = %doc.relative_path, "content unchanged, skipping");
            return FileOutcome::Skipped;
        }

        advance(doc, &mut state, FileState::Extracting);
        self.progress
            .report(&doc.path, n, total, &FilePhase::Extracting);
        let extracted = match extract_with_timeout(
            Arc::clone(&self.coordinator),
            doc.path.clone(),
            bytes,
            self.config.extraction.timeout_secs,
        )
        .await
        {
            Ok(extracted) => extracted,
            Err(e) => {
                advance(doc, &mut state, FileState::ExtractionFailed);
                return FileOutcome::Failed(e.to_string());
            }
        };
        advance(doc, &mut state, FileState::Extracted);
        for warning in &extracted.warnings {
            tracing::debug!(path = %doc.relative_path, warning = %warning, "extraction warning");
        }

        let cleaned = clean_text(&extracted.text);
        if !validate_text_quality(&cleaned, MIN_DOCUMENT_CHARS) {
            return FileOutcome::Failed("low text quality".to_string());
        }

        advance(doc, &mut state, FileState::Chunking);
        self.progress
            .report(&doc.path, n, total, &FilePhase::Chunking);
        let outcome = chunk_document(&cleaned, &self.config.chunking, self.strategy);
        stats.chunks_dropped += outcome.dropped;
        let chunks = outcome.chunks;
        if chunks.is_empty() {
            return FileOutcome::Failed("no valid chunks".to_string());
        }
        advance(doc, &mut state, FileState::Chunked);

        advance(doc, &mut state, FileState::Embedding);
        self.progress.report(
            &doc.path,
            n,
            total,
            &FilePhase::Embedding {
                chunks: chunks.len(),
            },
        );
        let embeddings = embed_chunks(self.embedder, &self.config.embedding, &chunks).await;
        let failed_chunks = embeddings.iter().filter(|e| e.is_failed()).count();
        if failed_chunks == chunks.len() {
            advance(doc, &mut state, FileState::EmbeddingFailed);
            return FileOutcome::Failed("embedding failed for every chunk".to_string());
        }
        advance(doc, &mut state, FileState::Embedded);

        let title = extracted.title.clone().unwrap_or_else(|| {
            doc.path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| doc.relative_path.clone())
        });
        let timestamp = chrono::Utc::now().to_rfc3339();

        let points: Vec<IndexedPoint> = chunks
            .iter()
            .zip(embeddings.iter())
            .filter_map(|(chunk, embedding)| match embedding {
                ChunkEmbedding::Vector(vector) => Some(IndexedPoint {
                    id: IndexedPoint::stable_id(&doc.relative_path, chunk.chunk_index),
                    vector: vector.clone(),
                    payload: PointPayload {
                        doc_type: DOC_TYPE_CHUNK,
                        text: chunk.text.clone(),
                        source_path: doc.relative_path.clone(),
                        title: title.clone(),
                        timestamp: timestamp.clone(),
                        chunk_index: chunk.chunk_index,
                        total_chunks: chunk.total_chunks,
                        semantic_block_index: chunk.semantic_block_index,
                        token_count: chunk.token_count,
                        chunking_method: chunk.chunking_method,
                        embedding_model: self.embedder.model_name().to_string(),
                        file_hash: file_hash.clone(),
                    },
                }),
                ChunkEmbedding::Failed(_) => None,
            })
            .collect();

        self.progress.report(
            &doc.path,
            n,
            total,
            &FilePhase::Uploading {
                points: points.len(),
            },
        );
        for upload_batch in points.chunks(self.config.store.upload_batch_size) {
            if let Err(e) = upsert_with_retry(
                self.store,
                &self.config.store.collection,
                upload_batch,
                self.config.store.max_retries,
            )
            .await
            {
                return FileOutcome::Failed(format!("upload failed: {}", e));
            }
        }

        self.cache.mark_indexed(&doc.relative_path, &file_hash);
        advance(doc, &mut state, FileState::Uploaded);
        self.progress.report(
            &doc.path,
            n,
            total,
            &FilePhase::Done {
                chunks: points.len(),
            },
        );
        tracing::info!(
            path = %doc.relative_path,
            chunks = points.len(),
            extractor = extracted.extractor,
            "file indexed"
        );

        FileOutcome::Processed {
            uploaded: points.len(),
            failed_chunks,
        }
    }
}
