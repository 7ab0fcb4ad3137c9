//! Deterministic token counting.
//!
//! No tokenizer is bundled; counts are a word-weight approximation of a
//! BPE-style tokenizer (roughly one token per 4 characters, with short
//! words costing at least one token). What matters for the pipeline is
//! that the same function is used for every measurement in a run, so
//! budgets, ceilings, and batch planning all agree with each other.

/// Approximate characters per token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Count tokens in a text.
///
/// Deterministic: whitespace-separated words, each weighted by
/// `ceil(chars / 4)` with a floor of one token.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().map(word_weight).sum()
}

/// Token weight of a single whitespace-delimited word.
pub fn word_weight(word: &str) -> usize {
    word.chars().count().div_ceil(CHARS_PER_TOKEN).max(1)
}
