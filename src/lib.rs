//! # ragsync
//!
//! A local-first document ingestion pipeline for vector search.
//!
//! ragsync walks a directory of heterogeneous files, extracts plain text
//! with format fallback, chunks it in two levels with token validation,
//! embeds the chunks through a provider, and upserts the vectors into a
//! vector store — skipping anything whose content hash is already indexed.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────┐   ┌─────────┐   ┌───────────┐   ┌─────────┐   ┌────────┐
//! │ Scan  │──▶│ Dedup   │──▶│ Extract + │──▶│ Chunk + │──▶│ Embed  │
//! │ (fs)  │   │ (hash)  │   │ Normalize │   │ Validate│   │ (batch)│
//! └───────┘   └─────────┘   └───────────┘   └─────────┘   └───┬────┘
//!                                                             │
//!                                                        ┌────▼─────┐
//!                                                        │  Vector  │
//!                                                        │  store   │
//!                                                        └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and strategy resolution |
//! | [`models`] | Core data types |
//! | [`scan`] | Directory discovery with skip patterns |
//! | [`extract`] | Format-fallback text extraction |
//! | [`normalize`] | Text cleanup and quality validation |
//! | [`tokens`] | Deterministic token counting |
//! | [`chunk`] | Two-level chunking and the token-ceiling validator |
//! | [`dedup`] | Content-hash incremental updates |
//! | [`embedding`] | Embedding provider clients |
//! | [`batch`] | Token-budget batching, retry, and bisection |
//! | [`store`] | Vector store trait, Qdrant backend, memory backend |
//! | [`pipeline`] | Run orchestration and per-file state machine |
//! | [`progress`] | Per-file progress reporting |
//! | [`report`] | Run statistics and reports |

pub mod batch;
pub mod chunk;
pub mod config;
pub mod dedup;
pub mod embedding;
pub mod extract;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod scan;
pub mod store;
pub mod tokens;
