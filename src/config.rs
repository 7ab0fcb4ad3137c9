use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Chunking strategy tiers, resolved once at run start.
///
/// `Semantic` is structural + token-aware, `TokenWindow` a pure sliding
/// window over token weights, `CharWindow` a fixed character window with no
/// token awareness. Selecting a lower tier is a degradation, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    Semantic,
    TokenWindow,
    CharWindow,
}

impl ChunkStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkStrategy::Semantic => "semantic",
            ChunkStrategy::TokenWindow => "token-window",
            ChunkStrategy::CharWindow => "char-window",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Files larger than this are failed without being read.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Per-file extraction timeout; a hang becomes a typed failure.
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            timeout_secs: default_extraction_timeout(),
        }
    }
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}
fn default_extraction_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target token budget for Level-1 macro blocks.
    #[serde(default = "default_macro_tokens")]
    pub macro_tokens: usize,
    /// Target token size for Level-2 fine chunks.
    #[serde(default = "default_fine_tokens")]
    pub fine_tokens: usize,
    /// Tokens of trailing context carried into the next chunk.
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    /// Hard ceiling: the embedding model's maximum context.
    #[serde(default = "default_max_model_tokens")]
    pub max_model_tokens: usize,
    /// Chunks below this are dropped, not embedded.
    #[serde(default = "default_min_chunk_tokens")]
    pub min_chunk_tokens: usize,
    /// Tier selection: "semantic", "token-window", or "char-window".
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            macro_tokens: default_macro_tokens(),
            fine_tokens: default_fine_tokens(),
            overlap_tokens: default_overlap_tokens(),
            max_model_tokens: default_max_model_tokens(),
            min_chunk_tokens: default_min_chunk_tokens(),
            strategy: default_strategy(),
        }
    }
}

fn default_macro_tokens() -> usize {
    1024
}
fn default_fine_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    51
}
fn default_max_model_tokens() -> usize {
    8192
}
fn default_min_chunk_tokens() -> usize {
    50
}
fn default_strategy() -> String {
    "semantic".to_string()
}

impl ChunkingConfig {
    /// Resolve the configured strategy string into a fixed tier tag.
    pub fn resolve_strategy(&self) -> Result<ChunkStrategy> {
        match self.strategy.as_str() {
            "semantic" => Ok(ChunkStrategy::Semantic),
            "token-window" => Ok(ChunkStrategy::TokenWindow),
            "char-window" => Ok(ChunkStrategy::CharWindow),
            other => anyhow::bail!(
                "Unknown chunking strategy: '{}'. Must be semantic, token-window, or char-window.",
                other
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// "ollama" or "openai".
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Provider base URL. `RAGSYNC_EMBEDDING_URL` overrides.
    #[serde(default = "default_embedding_url")]
    pub url: String,
    /// Maximum chunks per provider call.
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    /// Maximum cumulative tokens per provider call.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            url: default_embedding_url(),
            batch_size: default_embedding_batch_size(),
            token_budget: default_token_budget(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_batch_size() -> usize {
    32
}
fn default_token_budget() -> usize {
    1800
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Vector store base URL. `RAGSYNC_STORE_URL` overrides.
    #[serde(default = "default_store_url")]
    pub url: String,
    /// API key is never read from the file; `RAGSYNC_STORE_API_KEY` only.
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,
    /// "Cosine", "Dot", or "Euclid".
    #[serde(default = "default_distance")]
    pub distance: String,
    /// Points per upsert call.
    #[serde(default = "default_upload_batch_size")]
    pub upload_batch_size: usize,
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            api_key: None,
            collection: default_collection(),
            vector_dim: default_vector_dim(),
            distance: default_distance(),
            upload_batch_size: default_upload_batch_size(),
            timeout_secs: default_store_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_store_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "documentation".to_string()
}
fn default_vector_dim() -> usize {
    768
}
fn default_distance() -> String {
    "Cosine".to_string()
}
fn default_upload_batch_size() -> usize {
    100
}
fn default_store_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_skip_hidden")]
    pub skip_hidden: bool,
    /// Glob patterns to exclude, merged with built-in defaults.
    #[serde(default)]
    pub skip_patterns: Vec<String>,
    /// Optional allow-list of extensions (".md", ".pdf", ...).
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            skip_hidden: default_skip_hidden(),
            skip_patterns: Vec::new(),
            extensions: None,
        }
    }
}

fn default_skip_hidden() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    /// "markdown" or "json".
    #[serde(default = "default_report_format")]
    pub report_format: String,
    /// Report file destination; no file is written when unset.
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            report_format: default_report_format(),
            report_path: None,
        }
    }
}

fn default_report_format() -> String {
    "markdown".to_string()
}

/// Load configuration from a TOML file, falling back to defaults when the
/// file does not exist. Environment overrides are applied either way.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    apply_env_overrides(&mut config);
    validate(&config)?;

    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(url) = std::env::var("RAGSYNC_STORE_URL") {
        config.store.url = url;
    }
    if let Ok(key) = std::env::var("RAGSYNC_STORE_API_KEY") {
        if !key.is_empty() {
            config.store.api_key = Some(key);
        }
    }
    if let Ok(url) = std::env::var("RAGSYNC_EMBEDDING_URL") {
        config.embedding.url = url;
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.fine_tokens == 0 {
        anyhow::bail!("chunking.fine_tokens must be > 0");
    }
    if config.chunking.macro_tokens < config.chunking.fine_tokens {
        anyhow::bail!("chunking.macro_tokens must be >= chunking.fine_tokens");
    }
    if config.chunking.overlap_tokens >= config.chunking.fine_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.fine_tokens");
    }
    if config.chunking.max_model_tokens < config.chunking.fine_tokens {
        anyhow::bail!("chunking.max_model_tokens must be >= chunking.fine_tokens");
    }
    config.chunking.resolve_strategy()?;

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.token_budget == 0 {
        anyhow::bail!("embedding.token_budget must be > 0");
    }
    match config.embedding.provider.as_str() {
        "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be ollama or openai.",
            other
        ),
    }

    if config.store.vector_dim == 0 {
        anyhow::bail!("store.vector_dim must be > 0");
    }
    if config.store.upload_batch_size == 0 {
        anyhow::bail!("store.upload_batch_size must be > 0");
    }
    match config.store.distance.as_str() {
        "Cosine" | "Dot" | "Euclid" => {}
        other => anyhow::bail!(
            "Unknown distance metric: '{}'. Must be Cosine, Dot, or Euclid.",
            other
        ),
    }

    match config.output.report_format.as_str() {
        "markdown" | "json" => {}
        other => anyhow::bail!(
            "Unknown report format: '{}'. Must be markdown or json.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.chunking.fine_tokens, 512);
        assert_eq!(config.chunking.overlap_tokens, 51);
        assert_eq!(config.chunking.max_model_tokens, 8192);
        assert_eq!(config.embedding.token_budget, 1800);
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [chunking]
            fine_tokens = 256
            overlap_tokens = 25

            [store]
            collection = "notes"
            vector_dim = 384
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.fine_tokens, 256);
        assert_eq!(config.chunking.macro_tokens, 1024);
        assert_eq!(config.store.collection, "notes");
        assert_eq!(config.store.vector_dim, 384);
    }

    #[test]
    fn rejects_zero_fine_tokens() {
        let mut config = Config::default();
        config.chunking.fine_tokens = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_overlap_at_or_above_fine_tokens() {
        let mut config = Config::default();
        config.chunking.overlap_tokens = config.chunking.fine_tokens;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_unknown_strategy() {
        let mut config = Config::default();
        config.chunking.strategy = "recursive".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let mut config = Config::default();
        config.embedding.provider = "cohere".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_unknown_distance() {
        let mut config = Config::default();
        config.store.distance = "Manhattan".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn strategy_resolution() {
        let mut config = ChunkingConfig::default();
        assert_eq!(config.resolve_strategy().unwrap(), ChunkStrategy::Semantic);
        config.strategy = "char-window".to_string();
        assert_eq!(config.resolve_strategy().unwrap(), ChunkStrategy::CharWindow);
    }
}
