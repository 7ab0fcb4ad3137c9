//! End-to-end pipeline tests against the in-memory store and a scripted
//! embedding client: incremental skip, idempotent re-index, partial
//! embedding failure, and failure isolation.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;

use ragsync::config::Config;
use ragsync::embedding::{EmbeddingClient, ProviderError};
use ragsync::pipeline::{CancelFlag, Pipeline};
use ragsync::progress::NoProgress;
use ragsync::report::RunStats;
use ragsync::store::MemoryStore;

const DIMS: usize = 4;

/// Deterministic embedder double. Optionally poisons any batch containing
/// a marker substring, which the batcher must isolate by bisection.
struct TestEmbedder {
    poison_marker: Option<&'static str>,
    calls: AtomicUsize,
}

impl TestEmbedder {
    fn healthy() -> Self {
        Self {
            poison_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn poisoned(marker: &'static str) -> Self {
        Self {
            poison_marker: Some(marker),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingClient for TestEmbedder {
    fn model_name(&self) -> &str {
        "test-embedder"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = self.poison_marker {
            if texts.iter().any(|t| t.contains(marker)) {
                return Err(ProviderError::ContextOverflow("marker".to_string()));
            }
        }
        Ok(texts.iter().map(|_| vec![0.5; DIMS]).collect())
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.store.collection = "test".to_string();
    config.store.vector_dim = DIMS;
    config.chunking.macro_tokens = 256;
    config.chunking.fine_tokens = 64;
    config.chunking.overlap_tokens = 6;
    config.chunking.min_chunk_tokens = 5;
    config.embedding.max_retries = 0;
    config
}

/// A paragraph of varied prose, large enough to pass the quality gate.
fn paragraph(seed: usize) -> String {
    format!(
        "Section {seed} covers deployment, configuration, and monitoring. \
         The service reads input files, validates their contents, and writes \
         results downstream. Operators should review logs after each rollout \
         and confirm that dashboards show healthy request rates."
    )
}

fn write_doc(dir: &Path, name: &str, paragraphs: usize) {
    let body: Vec<String> = (0..paragraphs).map(paragraph).collect();
    fs::write(dir.join(name), body.join("\n\n")).unwrap();
}

async fn run_pipeline(
    config: &Config,
    store: &MemoryStore,
    embedder: &TestEmbedder,
    root: &Path,
) -> RunStats {
    let progress = NoProgress;
    let mut pipeline =
        Pipeline::new(config, store, embedder, &progress, CancelFlag::new()).unwrap();
    pipeline.run(root).await.unwrap()
}

#[tokio::test]
async fn indexes_a_directory() {
    let tmp = TempDir::new().unwrap();
    write_doc(tmp.path(), "alpha.md", 4);
    write_doc(tmp.path(), "beta.md", 2);

    let config = test_config();
    let store = MemoryStore::new();
    let embedder = TestEmbedder::healthy();

    let stats = run_pipeline(&config, &store, &embedder, tmp.path()).await;

    assert_eq!(stats.files_total, 2);
    assert_eq!(stats.files_processed, 2);
    assert_eq!(stats.files_failed, 0);
    assert!(stats.chunks_created > 0);
    assert_eq!(store.point_count("test"), stats.chunks_created);
}

// Re-run over an unmodified directory: everything is skipped before
// extraction, so the provider sees no calls and no points change.
#[tokio::test]
async fn rerun_over_unchanged_directory_skips_everything() {
    let tmp = TempDir::new().unwrap();
    write_doc(tmp.path(), "alpha.md", 4);
    write_doc(tmp.path(), "beta.md", 3);
    write_doc(tmp.path(), "gamma.md", 2);

    let config = test_config();
    let store = MemoryStore::new();
    let embedder = TestEmbedder::healthy();

    let first = run_pipeline(&config, &store, &embedder, tmp.path()).await;
    assert_eq!(first.files_processed, 3);
    let calls_after_first = embedder.calls();
    let upserts_after_first = store.upsert_calls();
    let points_after_first = store.point_count("test");

    let second = run_pipeline(&config, &store, &embedder, tmp.path()).await;

    assert_eq!(second.files_total, 3);
    assert_eq!(second.files_processed, 0);
    assert_eq!(second.files_skipped, 3);
    assert_eq!(second.chunks_created, 0);
    assert_eq!(embedder.calls(), calls_after_first);
    assert_eq!(store.upsert_calls(), upserts_after_first);
    assert_eq!(store.point_count("test"), points_after_first);
}

// Indexing an unchanged file twice produces no duplicate points even when
// the dedup check is bypassed, because point ids are stable.
#[tokio::test]
async fn reindex_of_changed_file_overwrites_points() {
    let tmp = TempDir::new().unwrap();
    write_doc(tmp.path(), "alpha.md", 3);

    let config = test_config();
    let store = MemoryStore::new();
    let embedder = TestEmbedder::healthy();

    let first = run_pipeline(&config, &store, &embedder, tmp.path()).await;
    let first_points = store.point_count("test");
    assert_eq!(first_points, first.chunks_created);

    // Change the file: same chunk count, new content hash.
    let body: Vec<String> = (10..13).map(paragraph).collect();
    fs::write(tmp.path().join("alpha.md"), body.join("\n\n")).unwrap();

    let second = run_pipeline(&config, &store, &embedder, tmp.path()).await;
    assert_eq!(second.files_processed, 1);
    assert_eq!(
        store.point_count("test"),
        second.chunks_created,
        "stable ids must overwrite, not duplicate"
    );
}

#[tokio::test]
async fn same_run_duplicate_content_is_skipped() {
    let tmp = TempDir::new().unwrap();
    write_doc(tmp.path(), "alpha.md", 3);
    // Identical bytes under a different name.
    let original = fs::read(tmp.path().join("alpha.md")).unwrap();
    fs::write(tmp.path().join("copy.md"), &original).unwrap();

    let config = test_config();
    let store = MemoryStore::new();
    let embedder = TestEmbedder::healthy();

    let stats = run_pipeline(&config, &store, &embedder, tmp.path()).await;
    assert_eq!(stats.files_total, 2);
    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_skipped, 1);
}

#[tokio::test]
async fn corrupt_file_fails_alone_without_aborting_the_run() {
    let tmp = TempDir::new().unwrap();
    write_doc(tmp.path(), "good.md", 3);
    fs::write(tmp.path().join("bad.pdf"), b"not a valid pdf").unwrap();

    let config = test_config();
    let store = MemoryStore::new();
    let embedder = TestEmbedder::healthy();

    let stats = run_pipeline(&config, &store, &embedder, tmp.path()).await;

    assert_eq!(stats.files_total, 2);
    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.failures.len(), 1);
    assert!(stats.failures[0].path.contains("bad.pdf"));
}

#[tokio::test]
async fn low_quality_file_is_a_counted_failure() {
    let tmp = TempDir::new().unwrap();
    write_doc(tmp.path(), "good.md", 3);
    fs::write(tmp.path().join("junk.txt"), "aaaa aaaa aaaa").unwrap();

    let config = test_config();
    let store = MemoryStore::new();
    let embedder = TestEmbedder::healthy();

    let stats = run_pipeline(&config, &store, &embedder, tmp.path()).await;
    assert_eq!(stats.files_failed, 1);
    assert!(stats.failures[0].reason.contains("quality"));
}

#[tokio::test]
async fn oversized_file_is_refused_without_reading() {
    let tmp = TempDir::new().unwrap();
    write_doc(tmp.path(), "good.md", 3);
    write_doc(tmp.path(), "huge.md", 8);

    let mut config = test_config();
    // Cap below the size of huge.md but above good.md.
    let good_len = fs::metadata(tmp.path().join("good.md")).unwrap().len();
    config.extraction.max_file_size = good_len + 10;

    let store = MemoryStore::new();
    let embedder = TestEmbedder::healthy();
    let stats = run_pipeline(&config, &store, &embedder, tmp.path()).await;

    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_failed, 1);
    assert!(stats.failures[0].reason.contains("max_file_size"));
}

// A poison chunk inside one file is isolated; the rest of the file's
// chunks still embed and upload.
#[tokio::test]
async fn poison_chunk_is_isolated_and_rest_uploads() {
    let tmp = TempDir::new().unwrap();
    let mut body: Vec<String> = (0..5).map(paragraph).collect();
    body.insert(
        2,
        "This paragraph carries the poisonmarker token that the embedding \
         provider rejects outright, along with enough surrounding prose to \
         survive chunk validation and reach the provider as its own chunk."
            .to_string(),
    );
    fs::write(tmp.path().join("mixed.md"), body.join("\n\n")).unwrap();

    let config = test_config();
    let store = MemoryStore::new();
    let embedder = TestEmbedder::poisoned("poisonmarker");

    let stats = run_pipeline(&config, &store, &embedder, tmp.path()).await;

    assert_eq!(stats.files_processed, 1, "partial failure still uploads");
    assert!(stats.chunks_failed >= 1);
    assert!(stats.chunks_created >= 1);
    assert_eq!(store.point_count("test"), stats.chunks_created);
    for point in store.points("test") {
        assert!(!point.payload.text.contains("poisonmarker"));
    }
}

#[tokio::test]
async fn uploaded_points_carry_the_payload_contract() {
    let tmp = TempDir::new().unwrap();
    write_doc(tmp.path(), "guide.md", 4);

    let config = test_config();
    let store = MemoryStore::new();
    let embedder = TestEmbedder::healthy();

    let stats = run_pipeline(&config, &store, &embedder, tmp.path()).await;
    assert!(stats.chunks_created > 1);

    let mut points = store.points("test");
    points.sort_by_key(|p| p.payload.chunk_index);

    let total = points.len();
    for (i, point) in points.iter().enumerate() {
        assert_eq!(point.payload.doc_type, "DocumentChunk");
        assert_eq!(point.payload.chunk_index, i, "indices contiguous from 0");
        assert_eq!(point.payload.total_chunks, total);
        assert_eq!(point.payload.embedding_model, "test-embedder");
        assert_eq!(point.payload.chunking_method, "semantic");
        assert!(!point.payload.file_hash.is_empty());
        assert!(!point.payload.title.is_empty());
        assert!(point.payload.token_count > 0);
        assert!(point.payload.token_count <= config.chunking.max_model_tokens);
    }
}

#[tokio::test]
async fn cancellation_stops_between_files() {
    let tmp = TempDir::new().unwrap();
    write_doc(tmp.path(), "alpha.md", 2);
    write_doc(tmp.path(), "beta.md", 2);

    let config = test_config();
    let store = MemoryStore::new();
    let embedder = TestEmbedder::healthy();

    let cancel = CancelFlag::new();
    cancel.cancel();
    let progress = NoProgress;
    let mut pipeline = Pipeline::new(&config, &store, &embedder, &progress, cancel).unwrap();
    let stats = pipeline.run(tmp.path()).await.unwrap();

    assert_eq!(stats.files_total, 2);
    assert_eq!(stats.files_processed, 0);
    assert_eq!(store.point_count("test"), 0);
}

#[tokio::test]
async fn dims_mismatch_is_run_fatal() {
    let tmp = TempDir::new().unwrap();
    write_doc(tmp.path(), "alpha.md", 2);

    let mut config = test_config();
    config.store.vector_dim = DIMS + 1;

    let store = MemoryStore::new();
    let embedder = TestEmbedder::healthy();
    let progress = NoProgress;
    let mut pipeline =
        Pipeline::new(&config, &store, &embedder, &progress, CancelFlag::new()).unwrap();

    assert!(pipeline.run(tmp.path()).await.is_err());
}
