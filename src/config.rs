use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub push: PushConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Environment variable holding the comma-separated API keys.
    #[serde(default = "default_api_keys_env")]
    pub api_keys_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_pause_ms")]
    pub retry_pause_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            api_keys_env: default_api_keys_env(),
            max_retries: default_max_retries(),
            retry_pause_ms: default_retry_pause_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_model() -> String {
    "llama-3.1-8b-instant".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_api_keys_env() -> String {
    "GROQ_API_KEYS".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_pause_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// File extensions (with leading dot) that are chunked and indexed.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_commit_limit")]
    pub commit_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            commit_limit: default_commit_limit(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    [
        ".py", ".js", ".ts", ".tsx", ".jsx", ".java", ".cpp", ".h", ".c", ".md",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_chunk_size() -> usize {
    2000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_commit_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct PushConfig {
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

fn default_author_name() -> String {
    "Git Sense".to_string()
}
fn default_author_email() -> String {
    "gitsense@example.com".to_string()
}

/// Load the configuration file at `path`.
///
/// A missing file is not an error: every section has defaults, so the
/// server can run with nothing but `GROQ_API_KEYS` in the environment.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.ingest.chunk_size == 0 {
        anyhow::bail!("ingest.chunk_size must be > 0");
    }
    if config.ingest.chunk_overlap >= config.ingest.chunk_size {
        anyhow::bail!("ingest.chunk_overlap must be smaller than ingest.chunk_size");
    }
    if config.ingest.extensions.is_empty() {
        anyhow::bail!("ingest.extensions must not be empty");
    }
    if config.llm.max_retries == 0 {
        anyhow::bail!("llm.max_retries must be >= 1");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }
    Ok(())
}
