//! Text chunking: strategy dispatch, the fixed-recursive splitter, and
//! fragment cleaning shared by both strategies.
//!
//! The fixed-recursive splitter walks a priority-ordered separator list
//! (paragraph break, line break, sentence terminator, word boundary, then
//! raw characters), producing pieces that are merged back into fragments of
//! at most `max_chars` with `overlap_chars` of trailing context carried into
//! the next fragment. It is deterministic and makes no external calls.
//!
//! The semantic strategy (see [`crate::semantic`]) is dispatched through the
//! same entry point so callers cannot tell which one produced a fragment.

use anyhow::Result;
use tracing::warn;

use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingProvider;
use crate::semantic;

/// Separator priority for the fixed-recursive strategy.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Chunking strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    FixedRecursive,
    Semantic,
}

impl ChunkStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed" | "recursive" | "fixed-recursive" => Some(ChunkStrategy::FixedRecursive),
            "semantic" => Some(ChunkStrategy::Semantic),
            _ => None,
        }
    }
}

/// Split `text` into an ordered sequence of non-empty fragments.
///
/// Empty input yields an empty sequence, not an error. The embedding
/// provider is only consulted by the semantic strategy.
pub async fn chunk_text(
    text: &str,
    strategy: ChunkStrategy,
    embedder: &dyn EmbeddingProvider,
    cfg: &ChunkingConfig,
) -> Result<Vec<String>> {
    let raw = match strategy {
        ChunkStrategy::FixedRecursive => split_fixed_recursive(text, cfg),
        ChunkStrategy::Semantic => semantic::split_semantic(text, embedder, cfg).await?,
    };
    Ok(clean_fragments(raw, cfg))
}

/// Deterministic recursive splitter. Pure; exposed for tests.
pub fn split_fixed_recursive(text: &str, cfg: &ChunkingConfig) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let pieces = recursive_split(text, &SEPARATORS, cfg.max_chars);
    merge_pieces(&pieces, cfg.max_chars, cfg.overlap_chars)
}

/// Recursively split oversized text on the first applicable separator,
/// keeping separators attached so concatenating the pieces reconstructs
/// the input exactly.
fn recursive_split<'a>(text: &'a str, seps: &[&str], max_chars: usize) -> Vec<&'a str> {
    if char_len(text) <= max_chars {
        return vec![text];
    }

    match seps.first() {
        Some(sep) => {
            let parts: Vec<&str> = text.split_inclusive(sep).collect();
            if parts.len() == 1 {
                // Separator not present; fall through to the next one.
                return recursive_split(text, &seps[1..], max_chars);
            }
            parts
                .into_iter()
                .flat_map(|part| recursive_split(part, &seps[1..], max_chars))
                .collect()
        }
        None => hard_split(text, max_chars),
    }
}

/// Character-level fallback when no separator applies.
fn hard_split(text: &str, max_chars: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (byte_idx, _) in text.char_indices() {
        if count == max_chars {
            out.push(&text[start..byte_idx]);
            start = byte_idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

/// Greedily pack pieces into fragments of at most `max_chars`, carrying the
/// last `overlap_chars` of each fragment into the next to preserve
/// cross-boundary context.
fn merge_pieces(pieces: &[&str], max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for piece in pieces {
        let piece_len = char_len(piece);
        if buf_len + piece_len > max_chars && !buf.is_empty() {
            let tail = char_tail(&buf, overlap_chars).to_string();
            chunks.push(std::mem::take(&mut buf));
            buf_len = char_len(&tail);
            buf = tail;
        }
        buf.push_str(piece);
        buf_len += piece_len;
    }

    if !buf.trim().is_empty() {
        chunks.push(buf);
    }

    chunks
}

/// Normalize raw chunks into storable fragments.
///
/// NUL bytes (unencodable content) are stripped, whitespace trimmed,
/// under-length fragments discarded as noise, and over-length fragments
/// truncated on a character boundary. None of these conditions is fatal.
pub fn clean_fragments(raw: Vec<String>, cfg: &ChunkingConfig) -> Vec<String> {
    // Fixed-recursive fragments may legitimately run to max + overlap.
    let hard_cap = cfg.max_chars + cfg.overlap_chars;

    let mut out = Vec::new();
    for chunk in raw {
        let cleaned = if chunk.contains('\0') {
            warn!("fragment contained NUL bytes; stripping");
            chunk.replace('\0', "")
        } else {
            chunk
        };
        let trimmed = cleaned.trim();
        let len = char_len(trimmed);

        if len < cfg.min_chars {
            if len > 0 {
                warn!(chars = len, "discarding under-length fragment");
            }
            continue;
        }

        if len > hard_cap {
            warn!(chars = len, cap = hard_cap, "truncating over-length fragment");
            out.push(truncate_chars(trimmed, hard_cap).to_string());
        } else {
            out.push(trimmed.to_string());
        }
    }
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s`, always on a char boundary.
fn char_tail(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let total = char_len(s);
    if total <= n {
        return s;
    }
    let skip = total - n;
    let byte_idx = s
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[byte_idx..]
}

/// First `n` characters of `s`, always on a char boundary.
fn truncate_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max: usize, overlap: usize, min: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_chars: max,
            overlap_chars: overlap,
            min_chars: min,
            ..ChunkingConfig::default()
        }
    }

    #[test]
    fn test_empty_input_yields_empty_sequence() {
        assert!(split_fixed_recursive("", &cfg(100, 10, 5)).is_empty());
    }

    #[test]
    fn test_short_text_single_fragment() {
        let chunks = split_fixed_recursive("Hello, world!", &cfg(100, 10, 5));
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_fragments_respect_size_bound() {
        let text = (0..40)
            .map(|i| format!("Paragraph number {} with a bit of body text.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let c = cfg(120, 20, 5);
        let chunks = split_fixed_recursive(&text, &c);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                chunk.chars().count() <= c.max_chars + c.overlap_chars,
                "fragment of {} chars exceeds bound",
                chunk.chars().count()
            );
        }
    }

    #[test]
    fn test_reconstruction_covers_input() {
        // Concatenating fragments minus the carried overlap must rebuild
        // the original text.
        let text = "One two three four five.\n\nSix seven eight nine ten.\n\nEleven twelve.";
        let c = cfg(30, 8, 1);
        let chunks = split_fixed_recursive(text, &c);
        let mut rebuilt = chunks[0].clone();
        for chunk in &chunks[1..] {
            let overlap: String = rebuilt
                .chars()
                .rev()
                .take(c.overlap_chars)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            let stripped = chunk.strip_prefix(overlap.as_str()).unwrap_or(chunk);
            rebuilt.push_str(stripped);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_consecutive_fragments_share_overlap() {
        let text = "aaaa bbbb cccc dddd eeee ffff gggg hhhh iiii jjjj";
        let c = cfg(20, 5, 1);
        let chunks = split_fixed_recursive(text, &c);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail: String = pair[0]
                .chars()
                .rev()
                .take(c.overlap_chars)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            assert!(pair[1].starts_with(&tail), "overlap not carried forward");
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma.\n\nDelta epsilon zeta.\nEta theta.";
        let a = split_fixed_recursive(text, &cfg(25, 5, 1));
        let b = split_fixed_recursive(text, &cfg(25, 5, 1));
        assert_eq!(a, b);
    }

    #[test]
    fn test_hard_split_never_breaks_multibyte() {
        // No separators at all; forces the character-level fallback.
        let text = "日本語のテキストを分割する".repeat(10);
        let pieces = hard_split(&text, 7);
        for piece in pieces {
            assert!(!piece.is_empty());
            assert!(piece.chars().count() <= 7);
        }
    }

    #[test]
    fn test_clean_drops_under_length_fragment() {
        let raw = vec!["tiny".to_string(), "this fragment is long enough to keep".to_string()];
        let out = clean_fragments(raw, &cfg(100, 0, 20));
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("this fragment"));
    }

    #[test]
    fn test_clean_strips_nul_bytes() {
        let raw = vec!["corrupted\0but still readable content here".to_string()];
        let out = clean_fragments(raw, &cfg(100, 0, 10));
        assert_eq!(out.len(), 1);
        assert!(!out[0].contains('\0'));
        assert!(out[0].contains("corruptedbut"));
    }

    #[test]
    fn test_clean_truncates_on_char_boundary() {
        let raw = vec!["é".repeat(50)];
        let out = clean_fragments(raw, &cfg(30, 0, 5));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chars().count(), 30);
    }

    #[test]
    fn test_truncate_chars_boundary_safety() {
        let s = "aéö日本";
        assert_eq!(truncate_chars(s, 3), "aéö");
        assert_eq!(truncate_chars(s, 99), s);
    }

    #[test]
    fn test_char_tail() {
        assert_eq!(char_tail("abcdef", 3), "def");
        assert_eq!(char_tail("日本語テキスト", 2), "スト");
        assert_eq!(char_tail("ab", 5), "ab");
        assert_eq!(char_tail("abc", 0), "");
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(ChunkStrategy::parse("fixed"), Some(ChunkStrategy::FixedRecursive));
        assert_eq!(ChunkStrategy::parse("recursive"), Some(ChunkStrategy::FixedRecursive));
        assert_eq!(ChunkStrategy::parse("semantic"), Some(ChunkStrategy::Semantic));
        assert_eq!(ChunkStrategy::parse("magic"), None);
    }
}
