/// Configuration system for codeseek
///
/// Supports loading from multiple sources with priority:
/// CLI args > Environment variables > Config file > Defaults
use crate::embedding::BackendChoice;
use crate::error::{ConfigError, SeekError};
use crate::paths::PlatformPaths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound on shards per store
pub const MAX_SHARDS: usize = 256;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Log at debug level
    #[serde(default)]
    pub verbose: bool,

    /// Embedding backend configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Shard store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Chunking and file limits
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Search defaults
    #[serde(default)]
    pub search: SearchConfig,

    /// Worker pool configuration
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Embedding backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "auto", "local", "remote", "hosted" or "cpu"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Local model name (e.g., "all-MiniLM-L6-v2", "BAAI/bge-small-en-v1.5")
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Directory where local model files are downloaded and cached
    #[serde(default = "default_model_cache_dir")]
    pub cache_dir: PathBuf,

    /// Texts per embedding call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timeout in seconds for a single embedding call
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Inference server URL; setting it enables the remote backend in auto mode
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Model served by the inference server
    #[serde(default = "default_remote_model")]
    pub remote_model: String,

    /// Allow the hosted API in auto mode; `backend = "hosted"` enables it as well
    #[serde(default)]
    pub hosted_enabled: bool,

    /// Base URL of the OpenAI-compatible hosted API
    #[serde(default = "default_hosted_url")]
    pub hosted_url: String,

    /// Hosted embedding model
    #[serde(default = "default_hosted_model")]
    pub hosted_model: String,

    /// Environment variable holding the hosted API key
    #[serde(default = "default_hosted_api_key_env")]
    pub hosted_api_key_env: String,

    /// Vector size of the CPU fallback backend
    #[serde(default = "default_cpu_dimension")]
    pub cpu_dimension: usize,
}

/// Shard store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store directory, one sub-directory per shard
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// "lancedb" (persistent) or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Number of shards; fixed for the lifetime of a store
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
}

/// Indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Maximum characters per chunk before the sliding window applies
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared by neighbouring sliding-window chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Maximum file size to index (in bytes)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default result limit
    #[serde(default = "default_result_limit")]
    pub limit: usize,

    /// Default minimum similarity score (0.0 to 1.0)
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Per-shard candidate count; raised to the limit when smaller
    #[serde(default)]
    pub top_k_per_shard: Option<usize>,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Fan out across worker units when more than one shard is involved
    #[serde(default = "default_parallel")]
    pub parallel: bool,

    /// Fixed unit count; derived from available parallelism when unset
    #[serde(default)]
    pub worker_count: Option<usize>,
}

fn default_backend() -> String {
    "auto".to_string()
}

fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_model_cache_dir() -> PathBuf {
    PlatformPaths::default_model_cache_dir()
}

fn default_batch_size() -> usize {
    32
}

fn default_embedding_timeout() -> u64 {
    60
}

fn default_remote_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_hosted_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_hosted_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_hosted_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_cpu_dimension() -> usize {
    384
}

fn default_store_path() -> PathBuf {
    PlatformPaths::default_store_path()
}

fn default_store_backend() -> String {
    "lancedb".to_string()
}

fn default_shard_count() -> usize {
    4
}

fn default_chunk_size() -> usize {
    1500
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_max_file_size() -> usize {
    1_048_576 // 1 MB
}

fn default_result_limit() -> usize {
    10
}

fn default_min_score() -> f32 {
    0.5
}

fn default_parallel() -> bool {
    true
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model_name: default_model_name(),
            cache_dir: default_model_cache_dir(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
            remote_url: None,
            remote_model: default_remote_model(),
            hosted_enabled: false,
            hosted_url: default_hosted_url(),
            hosted_model: default_hosted_model(),
            hosted_api_key_env: default_hosted_api_key_env(),
            cpu_dimension: default_cpu_dimension(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            backend: default_store_backend(),
            shard_count: default_shard_count(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_file_size: default_max_file_size(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_result_limit(),
            min_score: default_min_score(),
            top_k_per_shard: None,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            worker_count: None,
        }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> SeekError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
    .into()
}

impl Config {
    /// Default configuration with a store dedicated to `project_root`
    pub fn for_project(project_root: &Path) -> Self {
        let mut config = Self::default();
        config.store.path = PlatformPaths::store_path_for_project(project_root);
        config
    }

    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, SeekError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location or create default
    pub fn load_or_default() -> Result<Self, SeekError> {
        let config_path = PlatformPaths::default_config_path();

        if config_path.exists() {
            tracing::info!("Loading config from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::debug!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), SeekError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::SaveFailed(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Parsed backend request
    pub fn backend_choice(&self) -> Result<BackendChoice, SeekError> {
        self.embedding.backend.parse::<BackendChoice>()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), SeekError> {
        self.backend_choice()?;

        if self.store.backend != "lancedb" && self.store.backend != "memory" {
            return Err(invalid(
                "store.backend",
                format!("must be 'lancedb' or 'memory', got '{}'", self.store.backend),
            ));
        }

        if self.store.shard_count == 0 || self.store.shard_count > MAX_SHARDS {
            return Err(invalid(
                "store.shard_count",
                format!(
                    "must be between 1 and {}, got {}",
                    MAX_SHARDS, self.store.shard_count
                ),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(invalid("embedding.batch_size", "must be greater than 0"));
        }

        if self.embedding.cpu_dimension == 0 {
            return Err(invalid("embedding.cpu_dimension", "must be greater than 0"));
        }

        if self.indexing.chunk_size == 0 {
            return Err(invalid("indexing.chunk_size", "must be greater than 0"));
        }

        if self.indexing.chunk_overlap >= self.indexing.chunk_size {
            return Err(invalid(
                "indexing.chunk_overlap",
                format!(
                    "must be smaller than chunk_size ({}), got {}",
                    self.indexing.chunk_size, self.indexing.chunk_overlap
                ),
            ));
        }

        if self.indexing.max_file_size == 0 {
            return Err(invalid("indexing.max_file_size", "must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.search.min_score) {
            return Err(invalid(
                "search.min_score",
                format!("must be between 0.0 and 1.0, got {}", self.search.min_score),
            ));
        }

        if self.search.limit == 0 {
            return Err(invalid("search.limit", "must be greater than 0"));
        }

        if self.pool.worker_count == Some(0) {
            return Err(invalid("pool.worker_count", "must be greater than 0"));
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(backend) = std::env::var("CODESEEK_BACKEND") {
            self.embedding.backend = backend;
        }

        if let Ok(model) = std::env::var("CODESEEK_MODEL") {
            self.embedding.model_name = model;
        }

        if let Ok(dir) = std::env::var("CODESEEK_CACHE_DIR") {
            self.embedding.cache_dir = PathBuf::from(dir);
        }

        if let Ok(url) = std::env::var("CODESEEK_REMOTE_URL") {
            self.embedding.remote_url = Some(url);
        }

        if let Ok(enabled) = std::env::var("CODESEEK_HOSTED_ENABLED") {
            self.embedding.hosted_enabled = matches!(enabled.as_str(), "1" | "true" | "yes");
        }

        if let Ok(path) = std::env::var("CODESEEK_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }

        if let Ok(shards) = std::env::var("CODESEEK_SHARDS")
            && let Ok(count) = shards.parse()
        {
            self.store.shard_count = count;
        }

        if let Ok(workers) = std::env::var("CODESEEK_WORKERS")
            && let Ok(count) = workers.parse()
        {
            self.pool.worker_count = Some(count);
        }

        if let Ok(size) = std::env::var("CODESEEK_CHUNK_SIZE")
            && let Ok(size) = size.parse()
        {
            self.indexing.chunk_size = size;
        }

        if let Ok(overlap) = std::env::var("CODESEEK_CHUNK_OVERLAP")
            && let Ok(overlap) = overlap.parse()
        {
            self.indexing.chunk_overlap = overlap;
        }

        if let Ok(verbose) = std::env::var("CODESEEK_VERBOSE") {
            self.verbose = matches!(verbose.as_str(), "1" | "true" | "yes");
        }
    }

    /// Create a new Config with defaults and environment overrides
    pub fn new() -> Result<Self, SeekError> {
        let mut config = Self::load_or_default()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests;
