//! Token-budget dynamic batching for embedding calls.
//!
//! Chunks are greedily packed into batches under two simultaneous
//! constraints: a maximum chunk count and a cumulative token budget. This
//! keeps provider calls near `ceil(total_tokens / budget)` instead of one
//! call per chunk. A failing batch is retried with exponential backoff,
//! then bisected until the poison chunk is isolated; that chunk alone is
//! marked failed and the rest of the batch succeeds. Partial failure never
//! aborts the run.

use std::collections::VecDeque;
use std::ops::Range;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::embedding::{EmbeddingClient, ProviderError};
use crate::models::FineChunk;

/// Per-chunk embedding outcome, in input order.
#[derive(Debug, Clone)]
pub enum ChunkEmbedding {
    Vector(Vec<f32>),
    Failed(String),
}

impl ChunkEmbedding {
    pub fn is_failed(&self) -> bool {
        matches!(self, ChunkEmbedding::Failed(_))
    }
}

/// Pack token counts into contiguous batches.
///
/// A batch closes when adding the next chunk would exceed either the count
/// cap or the token budget. A single chunk larger than the whole budget
/// still ships alone; the provider (or the validator before it) is the
/// judge of whether it fits.
pub fn plan_batches(
    token_counts: &[usize],
    max_batch_size: usize,
    token_budget: usize,
) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0usize;
    let mut tokens = 0usize;

    for (i, &count) in token_counts.iter().enumerate() {
        let over_budget = tokens + count > token_budget;
        let over_size = i - start >= max_batch_size;
        if i > start && (over_budget || over_size) {
            batches.push(start..i);
            start = i;
            tokens = 0;
        }
        tokens += count;
    }
    if start < token_counts.len() {
        batches.push(start..token_counts.len());
    }

    if !batches.is_empty() {
        tracing::debug!(
            chunks = token_counts.len(),
            batches = batches.len(),
            "planned embedding batches"
        );
    }
    batches
}

/// One provider call with exponential backoff on transient failures.
///
/// `ContextOverflow` is not retried: the input itself cannot succeed, so
/// the caller moves straight to bisection.
async fn embed_with_retry(
    client: &dyn EmbeddingClient,
    texts: &[String],
    max_retries: u32,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = match last_err {
                Some(ProviderError::RateLimited { retry_after_secs }) => {
                    Duration::from_secs(retry_after_secs.min(30))
                }
                _ => Duration::from_secs(1 << (attempt - 1).min(5)),
            };
            tracing::warn!(
                attempt,
                delay_secs = delay.as_secs(),
                "retrying embedding batch"
            );
            tokio::time::sleep(delay).await;
        }

        match client.embed(texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) if e.is_retryable() => last_err = Some(e),
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("embedding failed".to_string())))
}

/// Embed all chunks, preserving input order in the result.
///
/// Batches are planned from the chunks' measured token counts and flushed
/// in order. A batch that exhausts its retries is split in half and each
/// half re-queued, so a single poison chunk is isolated at size one while
/// every healthy neighbor still embeds.
pub async fn embed_chunks(
    client: &dyn EmbeddingClient,
    config: &EmbeddingConfig,
    chunks: &[FineChunk],
) -> Vec<ChunkEmbedding> {
    let token_counts: Vec<usize> = chunks.iter().map(|c| c.token_count).collect();
    let plan = plan_batches(&token_counts, config.batch_size, config.token_budget);

    let mut results: Vec<Option<ChunkEmbedding>> = vec![None; chunks.len()];

    for batch in plan {
        let mut queue: VecDeque<Range<usize>> = VecDeque::new();
        queue.push_back(batch);

        while let Some(range) = queue.pop_front() {
            let texts: Vec<String> = chunks[range.clone()]
                .iter()
                .map(|c| c.text.clone())
                .collect();

            match embed_with_retry(client, &texts, config.max_retries).await {
                Ok(vectors) => {
                    for (offset, vector) in vectors.into_iter().enumerate() {
                        results[range.start + offset] = Some(ChunkEmbedding::Vector(vector));
                    }
                }
                Err(e) if range.len() == 1 => {
                    tracing::warn!(
                        chunk = range.start,
                        error = %e,
                        "chunk failed embedding, excluding it"
                    );
                    results[range.start] = Some(ChunkEmbedding::Failed(e.to_string()));
                }
                Err(e) => {
                    let mid = range.start + range.len() / 2;
                    tracing::debug!(
                        from = range.start,
                        to = range.end,
                        error = %e,
                        "bisecting failed batch"
                    );
                    queue.push_front(mid..range.end);
                    queue.push_front(range.start..mid);
                }
            }
        }
    }

    results
        .into_iter()
        .map(|r| r.unwrap_or_else(|| ChunkEmbedding::Failed("not embedded".to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunk(text: &str, token_count: usize) -> FineChunk {
        FineChunk {
            chunk_index: 0,
            total_chunks: 0,
            semantic_block_index: 0,
            text: text.to_string(),
            token_count,
            chunking_method: "semantic",
            has_overlap: false,
        }
    }

    /// Provider double: fails any batch containing a poison text, counts
    /// calls, and returns unit vectors otherwise.
    struct ScriptedClient {
        poison: Option<String>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn healthy() -> Self {
            Self {
                poison: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn poisoned(text: &str) -> Self {
            Self {
                poison: Some(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingClient for ScriptedClient {
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ref poison) = self.poison {
                if texts.iter().any(|t| t == poison) {
                    return Err(ProviderError::ContextOverflow("poison".to_string()));
                }
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    fn config(batch_size: usize, token_budget: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size,
            token_budget,
            max_retries: 0,
            ..Default::default()
        }
    }

    #[test]
    fn batches_respect_token_budget() {
        let counts = vec![500, 500, 500, 500, 500];
        let plan = plan_batches(&counts, 20, 1800);
        for range in &plan {
            let total: usize = counts[range.clone()].iter().sum();
            assert!(total <= 1800, "batch {:?} holds {} tokens", range, total);
        }
        // 2500 tokens at 1800/batch: ceil = 2 calls, not 5.
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn batches_respect_count_cap() {
        let counts = vec![10; 10];
        let plan = plan_batches(&counts, 3, 1800);
        assert_eq!(plan.len(), 4);
        assert!(plan.iter().all(|r| r.len() <= 3));
    }

    #[test]
    fn oversized_single_chunk_ships_alone() {
        let counts = vec![100, 5000, 100];
        let plan = plan_batches(&counts, 20, 1800);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[1], 1..2);
    }

    #[test]
    fn call_count_scales_with_budget_not_chunk_count() {
        // 100 chunks of 200 tokens with an 1800-token budget: 9 chunks per
        // call, ceil(100/9) = 12 calls instead of 100.
        let counts = vec![200; 100];
        let plan = plan_batches(&counts, 20, 1800);
        assert_eq!(plan.len(), 12);
    }

    #[test]
    fn empty_input_plans_nothing() {
        assert!(plan_batches(&[], 20, 1800).is_empty());
    }

    #[tokio::test]
    async fn healthy_batch_embeds_everything() {
        let client = ScriptedClient::healthy();
        let chunks: Vec<FineChunk> = (0..10).map(|i| chunk(&format!("text {}", i), 200)).collect();

        let results = embed_chunks(&client, &config(20, 1800), &chunks).await;
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| !r.is_failed()));
        // 2000 tokens / 1800 budget -> 2 calls.
        assert_eq!(client.calls(), 2);
    }

    // Scenario: one malformed chunk inside a 10-chunk batch.
    #[tokio::test]
    async fn bisection_isolates_the_poison_chunk() {
        let chunks: Vec<FineChunk> = (0..10).map(|i| chunk(&format!("text {}", i), 10)).collect();
        let client = ScriptedClient::poisoned("text 7");

        let results = embed_chunks(&client, &config(20, 1800), &chunks).await;

        let failed: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_failed())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(failed, vec![7]);
        for (i, result) in results.iter().enumerate() {
            if i != 7 {
                assert!(matches!(result, ChunkEmbedding::Vector(_)));
            }
        }
    }

    #[tokio::test]
    async fn bisection_preserves_order() {
        let chunks: Vec<FineChunk> = (0..8).map(|i| chunk(&format!("text {}", i), 10)).collect();
        let client = ScriptedClient::poisoned("text 0");

        let results = embed_chunks(&client, &config(20, 1800), &chunks).await;
        assert!(results[0].is_failed());
        assert!(results[1..].iter().all(|r| !r.is_failed()));
    }
}
