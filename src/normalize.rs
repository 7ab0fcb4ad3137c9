//! Text cleanup and quality validation between extraction and chunking.
//!
//! Extractor output is noisy: stray control characters, mixed line endings,
//! runs of spaces from PDF layout. [`clean_text`] flattens all of that into
//! a stable shape so the chunkers see consistent paragraph boundaries.
//! [`validate_text_quality`] rejects documents that are too short or too
//! degenerate to be worth embedding.

/// Clean extracted text for chunking.
///
/// Normalizes line endings to `\n`, strips control characters (keeping
/// newline and tab), collapses space/tab runs, trims line edges, and caps
/// consecutive blank lines at one (so `\n\n` stays a paragraph boundary).
pub fn clean_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut cleaned = String::with_capacity(unified.len());
    for c in unified.chars() {
        match c {
            '\n' => cleaned.push('\n'),
            '\t' => cleaned.push(' '),
            c if c.is_control() => {}
            c => cleaned.push(c),
        }
    }

    let mut lines: Vec<String> = Vec::new();
    for line in cleaned.lines() {
        let mut out = String::with_capacity(line.len());
        let mut last_space = false;
        for c in line.trim().chars() {
            if c == ' ' {
                if !last_space {
                    out.push(' ');
                }
                last_space = true;
            } else {
                out.push(c);
                last_space = false;
            }
        }
        lines.push(out);
    }

    // Collapse 2+ blank lines into a single paragraph break.
    let mut result = String::with_capacity(cleaned.len());
    let mut blank_run = 0usize;
    for line in &lines {
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !result.is_empty() {
            result.push('\n');
            if blank_run > 0 {
                result.push('\n');
            }
        }
        result.push_str(line);
        blank_run = 0;
    }

    result
}

/// Whether cleaned text is worth sending through the pipeline.
///
/// Rejects text shorter than `min_chars`, with fewer than 10 distinct
/// (lowercased) characters, or fewer than 10 words. The diversity check
/// guards against binary leakage and repeated-character junk that survives
/// extraction.
pub fn validate_text_quality(text: &str, min_chars: usize) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < min_chars {
        return false;
    }

    if !has_char_diversity(trimmed) {
        return false;
    }

    trimmed.split_whitespace().count() >= 10
}

/// Character-diversity floor shared with the chunk validator: at least 10
/// distinct lowercased characters.
pub fn has_char_diversity(text: &str) -> bool {
    let mut seen = std::collections::HashSet::new();
    for c in text.chars().flat_map(|c| c.to_lowercase()) {
        seen.insert(c);
        if seen.len() >= 10 {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_line_endings() {
        assert_eq!(clean_text("one\r\ntwo\rthree"), "one\ntwo\nthree");
    }

    #[test]
    fn strips_control_characters() {
        assert_eq!(clean_text("a\u{0}b\u{7}c"), "abc");
    }

    #[test]
    fn collapses_spaces_and_tabs() {
        assert_eq!(clean_text("a  \t  b"), "a b");
    }

    #[test]
    fn trims_line_edges() {
        assert_eq!(clean_text("  hello  \n  world  "), "hello\nworld");
    }

    #[test]
    fn caps_blank_lines_at_paragraph_break() {
        assert_eq!(clean_text("one\n\n\n\n\ntwo"), "one\n\ntwo");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn quality_rejects_short_text() {
        assert!(!validate_text_quality("too short", 100));
    }

    #[test]
    fn quality_rejects_low_diversity() {
        let junk = "aaaa aaaa aaaa aaaa aaaa aaaa aaaa aaaa aaaa aaaa aaaa".repeat(4);
        assert!(!validate_text_quality(&junk, 100));
    }

    #[test]
    fn quality_rejects_too_few_words() {
        let text = "abcdefghijklmnopqrstuvwxyz".repeat(10);
        assert!(!validate_text_quality(&text, 100));
    }

    #[test]
    fn quality_accepts_normal_prose() {
        let text = "The ingestion pipeline converts heterogeneous local files \
                    into token-bounded text fragments, embeds them as vectors, \
                    and upserts them into a vector store for later retrieval.";
        assert!(validate_text_quality(text, 100));
    }
}
