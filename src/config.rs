//! TOML configuration parsing and the process-wide credentials value object.
//!
//! All tunables live in a single TOML file (see `config/feedback.example.toml`)
//! loaded once at startup by [`load_config`]. API keys are *not* part of the
//! file: they are read from the environment exactly once, into a
//! [`Credentials`] value that is passed by reference into every provider
//! factory. No component reads ambient environment state directly.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum fragment length in characters.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Characters carried over between consecutive fragments.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    /// Fragments shorter than this are discarded as noise.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    /// Percentile of adjacent-group cosine distances above which the
    /// semantic strategy inserts a breakpoint.
    #[serde(default = "default_breakpoint_percentile")]
    pub breakpoint_percentile: f64,
    /// Number of neighboring sentences folded into each sentence group
    /// on either side before embedding (semantic strategy).
    #[serde(default = "default_sentence_buffer")]
    pub sentence_buffer: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
            min_chars: default_min_chars(),
            breakpoint_percentile: default_breakpoint_percentile(),
            sentence_buffer: default_sentence_buffer(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    20
}
fn default_min_chars() -> usize {
    20
}
fn default_breakpoint_percentile() -> f64 {
    95.0
}
fn default_sentence_buffer() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Provider tag: `openai` or `gitee`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Model name; each provider has a default when unset.
    #[serde(default)]
    pub model: Option<String>,
    /// Vector dimensionality; each provider has a default when unset.
    #[serde(default)]
    pub dims: Option<usize>,
    /// Endpoint override, mainly for tests against a mock server.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            base_url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "gitee".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Provider tag: `openai`, `deepseek`, or `gitee`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Endpoint override, mainly for tests against a mock server.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Generation calls block on slow upstreams; minutes, not seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            base_url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_timeout() -> u64 {
    180
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Rubric fragments gathered per feedback request.
    #[serde(default = "default_rubric_k")]
    pub rubric_k: usize,
    /// Exemplar/reference fragments gathered per feedback request.
    #[serde(default = "default_reference_k")]
    pub reference_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rubric_k: default_rubric_k(),
            reference_k: default_reference_k(),
        }
    }
}

fn default_rubric_k() -> usize {
    4
}
fn default_reference_k() -> usize {
    6
}

/// API keys captured from the environment once at process start.
///
/// Provider factories take this by reference; a missing key fails the
/// factory call, never a later network call.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub gitee_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            gitee_api_key: std::env::var("GITEE_API_KEY").ok(),
            deepseek_api_key: std::env::var("DEEPSEEK_API_KEY").ok(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.max_chars");
    }
    if !(0.0..=100.0).contains(&config.chunking.breakpoint_percentile) {
        anyhow::bail!("chunking.breakpoint_percentile must be in [0, 100]");
    }

    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0 when set");
    }
    match config.embedding.provider.as_str() {
        "openai" | "gitee" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai or gitee.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "openai" | "deepseek" | "gitee" => {}
        other => anyhow::bail!(
            "Unknown LLM provider: '{}'. Must be openai, deepseek, or gitee.",
            other
        ),
    }

    if config.retrieval.rubric_k == 0 && config.retrieval.reference_k == 0 {
        anyhow::bail!("retrieval.rubric_k and retrieval.reference_k cannot both be 0");
    }

    Ok(())
}
