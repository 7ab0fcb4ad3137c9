//! Two-level chunking with token validation.
//!
//! Level 1 ([`macro_chunks`]) groups paragraphs into large structurally
//! coherent blocks under a token budget. Level 2 ([`FineChunker`]) splits
//! each block into embedding-sized chunks with overlap, using one of three
//! tiers fixed at run start. [`validate_chunks`] enforces the hard model
//! ceiling by recursive halving and drops degenerate chunks.
//!
//! Chunk indices are finalized once per file by [`finalize_indices`]:
//! contiguous from 0, with a constant `total_chunks`.

use crate::config::{ChunkStrategy, ChunkingConfig};
use crate::models::{FineChunk, MacroBlock};
use crate::normalize::has_char_diversity;
use crate::tokens::{count_tokens, word_weight, CHARS_PER_TOKEN};

/// Window size for the character-window tier.
const CHAR_WINDOW: usize = 1000;

/// Result of chunking one document.
#[derive(Debug)]
pub struct ChunkOutcome {
    pub chunks: Vec<FineChunk>,
    /// Chunks removed by the validator (too small or degenerate).
    pub dropped: usize,
}

/// Level-1 chunking: accumulate paragraphs into blocks of up to
/// `macro_tokens` tokens. A single paragraph is never split here, even when
/// it alone exceeds the budget; the validator repairs oversized output
/// downstream. The character-window tier has no notion of structure, so it
/// degrades to one block for the whole document.
pub fn macro_chunks(text: &str, macro_tokens: usize, strategy: ChunkStrategy) -> Vec<MacroBlock> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    if strategy == ChunkStrategy::CharWindow {
        tracing::debug!("structural chunking unavailable, whole document as one block");
        return vec![MacroBlock {
            index: 0,
            text: text.trim().to_string(),
            token_count: count_tokens(text),
        }];
    }

    let mut blocks: Vec<MacroBlock> = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    let mut close = |current: &mut String, current_tokens: &mut usize| {
        if !current.is_empty() {
            blocks.push(MacroBlock {
                index: blocks.len(),
                text: std::mem::take(current),
                token_count: *current_tokens,
            });
            *current_tokens = 0;
        }
    };

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        let para_tokens = count_tokens(para);

        if !current.is_empty() && current_tokens + para_tokens > macro_tokens {
            close(&mut current, &mut current_tokens);
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);
        current_tokens += para_tokens;
    }
    close(&mut current, &mut current_tokens);

    blocks
}

/// Level-2 chunker. The tier is fixed at construction so a whole run
/// chunks deterministically.
pub struct FineChunker {
    strategy: ChunkStrategy,
    fine_tokens: usize,
    overlap_tokens: usize,
}

impl FineChunker {
    pub fn new(strategy: ChunkStrategy, fine_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            strategy,
            fine_tokens,
            overlap_tokens,
        }
    }

    /// Split one macro block into chunks tagged with the producing tier.
    /// Indices are placeholders until [`finalize_indices`] runs.
    pub fn chunk_block(&self, block: &MacroBlock) -> Vec<FineChunk> {
        let pieces = match self.strategy {
            ChunkStrategy::Semantic => self.assemble(semantic_units(&block.text, self.fine_tokens)),
            ChunkStrategy::TokenWindow => self.token_windows(&block.text),
            ChunkStrategy::CharWindow => self.char_windows(&block.text),
        };

        pieces
            .into_iter()
            .map(|(text, has_overlap)| {
                let token_count = count_tokens(&text);
                FineChunk {
                    chunk_index: 0,
                    total_chunks: 0,
                    semantic_block_index: block.index,
                    text,
                    token_count,
                    chunking_method: self.strategy.as_str(),
                    has_overlap,
                }
            })
            .collect()
    }

    /// Greedy accumulation of sentence units up to the target, each chunk
    /// seeded with the trailing words of its predecessor.
    fn assemble(&self, units: Vec<String>) -> Vec<(String, bool)> {
        let mut chunks: Vec<(String, bool)> = Vec::new();
        let mut carry: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut tokens = 0usize;

        let flush = |carry: &mut Vec<String>,
                     current: &mut Vec<String>,
                     chunks: &mut Vec<(String, bool)>| {
            if current.is_empty() {
                return;
            }
            let has_overlap = !carry.is_empty();
            let mut text = carry.join(" ");
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&current.join(" "));
            *carry = trailing_words(&text, self.overlap_tokens);
            chunks.push((text, has_overlap));
            current.clear();
        };

        for unit in units {
            let unit_tokens = count_tokens(&unit);
            if !current.is_empty() && tokens + unit_tokens > self.fine_tokens {
                flush(&mut carry, &mut current, &mut chunks);
                tokens = carry.iter().map(|w| word_weight(w)).sum();
            }
            tokens += unit_tokens;
            current.push(unit);
        }
        flush(&mut carry, &mut current, &mut chunks);

        chunks
    }

    /// Pure sliding window over whitespace words by token weight.
    fn token_windows(&self, text: &str) -> Vec<(String, bool)> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < words.len() {
            let mut end = start;
            let mut tokens = 0usize;
            while end < words.len() {
                let w = word_weight(words[end]);
                if end > start && tokens + w > self.fine_tokens {
                    break;
                }
                tokens += w;
                end += 1;
            }

            chunks.push((words[start..end].join(" "), start > 0));

            if end >= words.len() {
                break;
            }

            // Step back far enough to carry ~overlap_tokens of context.
            let mut overlap_start = end;
            let mut overlap = 0usize;
            while overlap_start > start + 1 && overlap < self.overlap_tokens {
                overlap_start -= 1;
                overlap += word_weight(words[overlap_start]);
            }
            start = overlap_start.max(start + 1);
        }

        chunks
    }

    /// Fixed character windows, no token awareness.
    fn char_windows(&self, text: &str) -> Vec<(String, bool)> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let overlap_chars = (self.overlap_tokens * CHARS_PER_TOKEN).min(CHAR_WINDOW / 2);
        let mut chunks = Vec::new();
        let mut start = 0usize;

        loop {
            let end = (start + CHAR_WINDOW).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                chunks.push((piece.to_string(), start > 0));
            }
            if end == chars.len() {
                break;
            }
            start = end - overlap_chars;
        }

        chunks
    }
}

/// Split text into sentence-ish units: sentence terminators followed by
/// whitespace, or line breaks. Units longer than `max_tokens` are pre-split
/// at whitespace so greedy accumulation can always respect the target; a
/// single unbroken run gets a hard cut at the budget boundary.
fn semantic_units(text: &str, max_tokens: usize) -> Vec<String> {
    let mut raw_units: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            push_unit(&mut raw_units, &mut current);
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            match chars.peek() {
                Some(next) if next.is_whitespace() => push_unit(&mut raw_units, &mut current),
                None => push_unit(&mut raw_units, &mut current),
                _ => {}
            }
        }
    }
    push_unit(&mut raw_units, &mut current);

    raw_units
        .into_iter()
        .flat_map(|unit| {
            if count_tokens(&unit) > max_tokens {
                word_windows(&unit, max_tokens)
            } else {
                vec![unit]
            }
        })
        .collect()
}

fn push_unit(units: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        units.push(trimmed.to_string());
    }
    current.clear();
}

/// Group whitespace words into consecutive windows of at most `target`
/// tokens each (every window holds at least one word).
fn word_windows(text: &str, target: usize) -> Vec<String> {
    let mut windows = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut tokens = 0usize;

    for word in text.split_whitespace() {
        let w = word_weight(word);
        if !current.is_empty() && tokens + w > target {
            windows.push(current.join(" "));
            current.clear();
            tokens = 0;
        }
        current.push(word);
        tokens += w;
    }
    if !current.is_empty() {
        windows.push(current.join(" "));
    }

    windows
}

/// The trailing words of a chunk totalling at least `overlap_tokens`.
fn trailing_words(text: &str, overlap_tokens: usize) -> Vec<String> {
    if overlap_tokens == 0 {
        return Vec::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut tail: Vec<String> = Vec::new();
    let mut tokens = 0usize;
    for word in words.iter().rev() {
        if tokens >= overlap_tokens {
            break;
        }
        tokens += word_weight(word);
        tail.push((*word).to_string());
    }
    tail.reverse();
    tail
}

/// Recursively split text into pieces measuring at most `ceiling` tokens,
/// halving the target on each level. Every split strictly reduces token
/// count, so recursion terminates; a single word that cannot be split is
/// the terminal case and is returned as-is.
pub fn split_to_ceiling(text: &str, ceiling: usize) -> Vec<String> {
    if count_tokens(text) <= ceiling {
        return vec![text.to_string()];
    }
    let target = (ceiling / 2).max(1);
    let windows = word_windows(text, target);
    if windows.len() <= 1 {
        return windows;
    }
    windows
        .into_iter()
        .flat_map(|w| split_to_ceiling(&w, ceiling))
        .collect()
}

/// Outcome of validation over a file's raw chunks.
#[derive(Debug)]
pub struct ValidationOutcome {
    pub chunks: Vec<FineChunk>,
    pub dropped: usize,
}

/// Enforce the hard token ceiling and drop degenerate chunks.
///
/// Oversized chunks are re-chunked by [`split_to_ceiling`] and tagged
/// `"rechunk"`. Chunks under `min_chunk_tokens` or without enough character
/// diversity (binary leakage guard) are dropped and counted.
pub fn validate_chunks(
    raw: Vec<FineChunk>,
    max_model_tokens: usize,
    min_chunk_tokens: usize,
) -> ValidationOutcome {
    let mut chunks: Vec<FineChunk> = Vec::new();
    let mut dropped = 0usize;

    let mut keep = |chunk: FineChunk, chunks: &mut Vec<FineChunk>, dropped: &mut usize| {
        if chunk.token_count < min_chunk_tokens {
            tracing::debug!(tokens = chunk.token_count, "dropping undersized chunk");
            *dropped += 1;
        } else if !has_char_diversity(&chunk.text) {
            tracing::debug!("dropping low-diversity chunk");
            *dropped += 1;
        } else {
            chunks.push(chunk);
        }
    };

    for chunk in raw {
        if chunk.token_count <= max_model_tokens {
            keep(chunk, &mut chunks, &mut dropped);
            continue;
        }

        tracing::warn!(
            tokens = chunk.token_count,
            ceiling = max_model_tokens,
            "chunk exceeds model ceiling, re-chunking"
        );
        for piece in split_to_ceiling(&chunk.text, max_model_tokens) {
            let token_count = count_tokens(&piece);
            if token_count > max_model_tokens {
                // Unsplittable terminal piece; embedding it would fail anyway.
                tracing::warn!(tokens = token_count, "unsplittable oversized piece dropped");
                dropped += 1;
                continue;
            }
            keep(
                FineChunk {
                    chunk_index: 0,
                    total_chunks: 0,
                    semantic_block_index: chunk.semantic_block_index,
                    text: piece,
                    token_count,
                    chunking_method: "rechunk",
                    has_overlap: false,
                },
                &mut chunks,
                &mut dropped,
            );
        }
    }

    ValidationOutcome { chunks, dropped }
}

/// Assign final per-file indices: contiguous from 0, constant total.
pub fn finalize_indices(chunks: &mut [FineChunk]) {
    let total = chunks.len();
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.chunk_index = i;
        chunk.total_chunks = total;
    }
}

/// Run the full Level-1 → Level-2 → validation path for one document.
pub fn chunk_document(
    text: &str,
    config: &ChunkingConfig,
    strategy: ChunkStrategy,
) -> ChunkOutcome {
    let blocks = macro_chunks(text, config.macro_tokens, strategy);
    let chunker = FineChunker::new(strategy, config.fine_tokens, config.overlap_tokens);

    let raw: Vec<FineChunk> = blocks
        .iter()
        .flat_map(|block| chunker.chunk_block(block))
        .collect();

    let outcome = validate_chunks(raw, config.max_model_tokens, config.min_chunk_tokens);
    let mut chunks = outcome.chunks;
    finalize_indices(&mut chunks);

    ChunkOutcome {
        chunks,
        dropped: outcome.dropped,
    }
}
