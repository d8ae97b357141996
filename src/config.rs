use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub scanners: ScannersConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the serialized index and the ingested-files registry.
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Source directory enumerated for `*.pdf` files.
    pub data_dir: PathBuf,
    /// Directory holding per-page rendered images, served at `/images`.
    pub image_dir: PathBuf,
    #[serde(default = "default_parser")]
    pub parser: String,
    /// Required when `parser = "remote"`.
    #[serde(default)]
    pub remote_endpoint: Option<String>,
    #[serde(default = "default_max_metadata_len")]
    pub max_metadata_len: usize,
    #[serde(default = "default_parse_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_parser() -> String {
    "local".to_string()
}
fn default_max_metadata_len() -> usize {
    512
}
fn default_parse_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    9
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("_data/cache")
}
fn default_cache_ttl() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannersConfig {
    #[serde(default = "default_toxicity_threshold")]
    pub toxicity_threshold: f64,
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,
}

impl Default for ScannersConfig {
    fn default() -> Self {
        Self {
            toxicity_threshold: default_toxicity_threshold(),
            token_limit: default_token_limit(),
        }
    }
}

fn default_toxicity_threshold() -> f64 {
    0.5
}
fn default_token_limit() -> usize {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Base URL prefixed to image citations in query responses.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:7878".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.ingest.max_metadata_len == 0 {
        anyhow::bail!("ingest.max_metadata_len must be > 0");
    }

    match config.ingest.parser.as_str() {
        "local" => {}
        "remote" => {
            if config.ingest.remote_endpoint.is_none() {
                anyhow::bail!("ingest.remote_endpoint must be set when parser is 'remote'");
            }
        }
        other => anyhow::bail!("Unknown parser: '{}'. Must be local or remote.", other),
    }

    if config.cache.ttl_secs == 0 {
        anyhow::bail!("cache.ttl_secs must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.scanners.toxicity_threshold) {
        anyhow::bail!("scanners.toxicity_threshold must be in [0.0, 1.0]");
    }

    if config.scanners.token_limit == 0 {
        anyhow::bail!("scanners.token_limit must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
