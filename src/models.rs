//! Core data types that flow through the ingestion pipeline.
//!
//! A [`SourceDocument`] is produced by the directory scan and is read-only
//! from then on. Extraction turns it into an ephemeral [`ExtractedText`],
//! chunking into [`MacroBlock`]s and then [`FineChunk`]s. The durable unit,
//! [`IndexedPoint`](crate::store::IndexedPoint), lives in the store module.

use std::path::PathBuf;

/// A file discovered by the directory scan.
///
/// Raw bytes are read once by the pipeline and never mutated; the content
/// hash over those bytes is the dedup key for the whole run.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the scan root, used as the stable source identifier.
    pub relative_path: String,
    /// File size in bytes, from scan-time metadata.
    pub size: u64,
    /// Best-effort media type guessed from the extension.
    pub media_type: &'static str,
}

/// Plain text produced by an extractor. Discarded after chunking.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    /// Name of the extractor variant that produced the text.
    pub extractor: &'static str,
    /// Document title when the extractor found one (file name otherwise).
    pub title: Option<String>,
    /// Non-fatal oddities encountered during extraction.
    pub warnings: Vec<String>,
}

/// A large, structurally coherent block from Level-1 chunking.
///
/// Exists only during the Level-1 → Level-2 handoff.
#[derive(Debug, Clone)]
pub struct MacroBlock {
    /// Ordinal of this block within its document.
    pub index: usize,
    pub text: String,
    pub token_count: usize,
}

/// An embedding-sized chunk produced by Level-2 chunking and validation.
#[derive(Debug, Clone, PartialEq)]
pub struct FineChunk {
    /// 0-based, contiguous across the whole file once finalized.
    pub chunk_index: usize,
    /// Total chunks for the file; fixed when indices are finalized.
    pub total_chunks: usize,
    /// Ordinal of the parent [`MacroBlock`].
    pub semantic_block_index: usize,
    pub text: String,
    pub token_count: usize,
    /// Which chunker tier produced this chunk.
    pub chunking_method: &'static str,
    /// True when the chunk was seeded with the tail of its predecessor.
    pub has_overlap: bool,
}

/// Lifecycle of one file inside a pipeline run.
///
/// `SkippedUnchanged`, `ExtractionFailed`, `EmbeddingFailed`, and `Uploaded`
/// are terminal. `EmbeddingFailed` is only reached when every chunk of the
/// file failed; partial embedding failures still upload the surviving
/// chunks and terminate in `Uploaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Discovered,
    HashComputed,
    SkippedUnchanged,
    Extracting,
    Extracted,
    ExtractionFailed,
    Chunking,
    Chunked,
    Embedding,
    Embedded,
    EmbeddingFailed,
    Uploaded,
}

impl FileState {
    /// Whether the state ends the file's journey through the pipeline.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FileState::SkippedUnchanged
                | FileState::ExtractionFailed
                | FileState::EmbeddingFailed
                | FileState::Uploaded
        )
    }
}
