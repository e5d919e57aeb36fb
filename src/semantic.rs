//! Embedding-gradient semantic chunking.
//!
//! Splits text into sentences, folds each sentence together with its
//! neighbors into a buffered group, embeds the groups in one batched call,
//! and measures the cosine distance between adjacent group vectors. A
//! breakpoint is inserted wherever the distance exceeds the configured
//! percentile of all adjacent distances, so fragments end where the topic
//! shifts. Substantially more expensive than the fixed-recursive strategy
//! and dependent on the embedding provider, but interchangeable with it
//! behind [`crate::chunk::chunk_text`].

use anyhow::Result;
use tracing::debug;

use crate::config::ChunkingConfig;
use crate::embedding::{cosine_similarity, EmbeddingProvider};

/// Split `text` at semantic breakpoints. Returns raw fragments; cleaning
/// (length bounds, NUL stripping) happens in the shared chunk pipeline.
pub async fn split_semantic(
    text: &str,
    embedder: &dyn EmbeddingProvider,
    cfg: &ChunkingConfig,
) -> Result<Vec<String>> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Ok(Vec::new());
    }
    if sentences.len() == 1 {
        return Ok(vec![sentences[0].clone()]);
    }

    let groups = buffer_groups(&sentences, cfg.sentence_buffer);
    let vectors = embedder.embed(&groups).await?;

    let distances: Vec<f32> = vectors
        .windows(2)
        .map(|pair| 1.0 - cosine_similarity(&pair[0], &pair[1]))
        .collect();

    let threshold = percentile(&distances, cfg.breakpoint_percentile);
    let breakpoints: Vec<usize> = distances
        .iter()
        .enumerate()
        .filter(|(_, d)| **d > threshold)
        .map(|(i, _)| i)
        .collect();

    debug!(
        sentences = sentences.len(),
        breakpoints = breakpoints.len(),
        threshold,
        "semantic chunking"
    );

    Ok(join_at_breakpoints(&sentences, &breakpoints))
}

/// Sentence segmentation on terminal punctuation followed by whitespace.
/// Keeps the terminator with its sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_none_or(|next| next.is_whitespace()) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

/// Combine each sentence with up to `buffer` neighbors on either side so
/// the embedded unit carries local context.
fn buffer_groups(sentences: &[String], buffer: usize) -> Vec<String> {
    sentences
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let start = i.saturating_sub(buffer);
            let end = (i + buffer + 1).min(sentences.len());
            sentences[start..end].join(" ")
        })
        .collect()
}

/// Value at the given percentile (linear interpolation between ranks).
fn percentile(values: &[f32], pct: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = (rank - lower as f64) as f32;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Join sentence runs between breakpoints into fragments. A breakpoint at
/// index `i` separates sentence `i` from sentence `i + 1`.
fn join_at_breakpoints(sentences: &[String], breakpoints: &[usize]) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut start = 0;
    for &bp in breakpoints {
        fragments.push(sentences[start..=bp].join(" "));
        start = bp + 1;
    }
    if start < sentences.len() {
        fragments.push(sentences[start..].join(" "));
    }
    fragments
}
