use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = ".codevec";
const CONFIG_FILE: &str = "config.toml";

/// Minimum allowed wait for a single embedding batch. Shorter timeouts cause
/// false failures against real providers under load.
pub const MIN_VECTOR_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// File extensions to index
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Patterns to ignore (in addition to .gitignore)
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Target chunk size in bytes (whole lines are never split)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Number of file-lifecycle workers (None = number of CPUs)
    #[serde(default)]
    pub worker_count: Option<usize>,

    /// Number of concurrent embedding requests (None = provider default:
    /// 8 for remote providers, 1 for local ones)
    #[serde(default)]
    pub vector_thread_count: Option<usize>,

    /// Fraction of the provider's per-request token limit a batch may use
    #[serde(default = "default_batch_token_safety_fraction")]
    pub batch_token_safety_fraction: f64,

    /// Wait for one embedding batch, in seconds. Values below 300 are
    /// clamped up; aggressive timeouts fail healthy-but-slow providers.
    #[serde(default = "default_vector_processing_timeout")]
    pub vector_processing_timeout_seconds: u64,

    /// Sliding window for throttling classification
    #[serde(default = "default_throttle_window")]
    pub throttle_window_seconds: u64,

    /// Rolling window for throughput smoothing
    #[serde(default = "default_throughput_window")]
    pub throughput_window_seconds: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            ignore_patterns: default_ignore_patterns(),
            chunk_size: default_chunk_size(),
            worker_count: None,
            vector_thread_count: None,
            batch_token_safety_fraction: default_batch_token_safety_fraction(),
            vector_processing_timeout_seconds: default_vector_processing_timeout(),
            throttle_window_seconds: default_throttle_window(),
            throughput_window_seconds: default_throughput_window(),
        }
    }
}

impl IndexerConfig {
    /// Resolved file-worker count (config value or CPU count, at least 1).
    pub fn effective_worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Slot tracker capacity: two more than the worker count so the display
    /// can show files queued right behind the active ones.
    pub fn slot_capacity(&self) -> usize {
        self.effective_worker_count() + 2
    }

    /// Batch wait timeout with the 300 s floor applied.
    pub fn vector_processing_timeout(&self) -> Duration {
        Duration::from_secs(
            self.vector_processing_timeout_seconds
                .max(MIN_VECTOR_TIMEOUT_SECS),
        )
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_secs(self.throttle_window_seconds)
    }

    pub fn throughput_window(&self) -> Duration {
        Duration::from_secs(self.throughput_window_seconds)
    }

    /// True when the path's extension is one of the configured candidates.
    pub fn indexes_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e == ext))
            .unwrap_or(false)
    }

    /// True when a single path component (a directory or file name) is named
    /// by an ignore pattern. Patterns match whole components, never
    /// substrings: a `build` pattern drops `build/` but not `src/builder.rs`,
    /// and never fires on text in the repository's own ancestry.
    pub fn ignores_component(&self, name: &std::ffi::OsStr) -> bool {
        name.to_str()
            .map(|name| self.ignore_patterns.iter().any(|p| p == name))
            .unwrap_or(false)
    }
}

fn default_extensions() -> Vec<String> {
    vec![
        "rs".to_string(),
        "py".to_string(),
        "ts".to_string(),
        "tsx".to_string(),
        "js".to_string(),
        "jsx".to_string(),
        "go".to_string(),
        "java".to_string(),
        "c".to_string(),
        "cc".to_string(),
        "cpp".to_string(),
        "cxx".to_string(),
        "h".to_string(),
        "hpp".to_string(),
        "hxx".to_string(),
    ]
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        "node_modules".to_string(),
        "target".to_string(),
        ".git".to_string(),
        "dist".to_string(),
        "build".to_string(),
        "__pycache__".to_string(),
        ".venv".to_string(),
        "vendor".to_string(),
    ]
}

fn default_chunk_size() -> usize {
    2048
}

fn default_batch_token_safety_fraction() -> f64 {
    0.9
}

fn default_vector_processing_timeout() -> u64 {
    MIN_VECTOR_TIMEOUT_SECS
}

fn default_throttle_window() -> u64 {
    10
}

fn default_throughput_window() -> u64 {
    30
}

/// Which embedding backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible HTTP endpoint
    Remote,
    /// In-process fastembed models
    Local,
}

impl Default for ProviderKind {
    fn default() -> Self {
        Self::Local
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Embedding backend
    #[serde(default)]
    pub provider: ProviderKind,

    /// Embedding model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Remote provider settings
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_model(),
            remote: RemoteConfig::default(),
        }
    }
}

fn default_model() -> String {
    "nomic-embed-text-v1.5".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Custom API base URL (None = provider default)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Token-bucket refill rate for the client-side rate limiter
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: f64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,

    /// Per-request token limit override (None = per-model default)
    #[serde(default)]
    pub max_request_tokens: Option<usize>,

    /// Hugging Face repo of the tokenizer used for exact token counts
    /// (None = derived from the model name where known)
    #[serde(default)]
    pub tokenizer_repo: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: None,
            requests_per_minute: default_requests_per_minute(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            exponential_base: default_exponential_base(),
            max_request_tokens: None,
            tokenizer_repo: None,
        }
    }
}

fn default_api_key_env() -> String {
    "CODEVEC_API_KEY".to_string()
}

fn default_requests_per_minute() -> f64 {
    3000.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_exponential_base() -> f64 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Vector index directory (relative to .codevec/)
    #[serde(default = "default_index_dir")]
    pub index_dir: String,

    /// Full-text sidecar directory (relative to .codevec/)
    #[serde(default = "default_fts_dir")]
    pub fts_dir: String,

    /// Whether to maintain the full-text sidecar
    #[serde(default = "default_full_text")]
    pub full_text: bool,

    /// Explicit collection name (None = derived from project and model)
    #[serde(default)]
    pub collection: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            fts_dir: default_fts_dir(),
            full_text: default_full_text(),
            collection: None,
        }
    }
}

fn default_index_dir() -> String {
    "index".to_string()
}

fn default_fts_dir() -> String {
    "fts".to_string()
}

fn default_full_text() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable file logging
    #[serde(default)]
    pub enabled: bool,

    /// Mirror logs to stderr
    #[serde(default = "default_log_stderr")]
    pub stderr: bool,

    /// Log level for the file layer
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log directory (relative paths resolve against the project root)
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    /// Rotation strategy: hourly, daily, minutely, never
    #[serde(default = "default_log_rotation")]
    pub rotation: String,

    /// Log file name prefix
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stderr: default_log_stderr(),
            level: default_log_level(),
            directory: default_log_directory(),
            rotation: default_log_rotation(),
            file_prefix: default_log_prefix(),
        }
    }
}

fn default_log_stderr() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> PathBuf {
    PathBuf::from(".codevec/logs")
}

fn default_log_rotation() -> String {
    "daily".to_string()
}

fn default_log_prefix() -> String {
    "codevec.log".to_string()
}

impl Config {
    /// Load configuration from the .codevec directory
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_DIR).join(CONFIG_FILE);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;

            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", config_path))
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to the .codevec directory
    pub fn save(&self, root: &Path) -> Result<()> {
        let config_dir = root.join(CONFIG_DIR);
        let config_path = config_dir.join(CONFIG_FILE);

        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory {:?}", config_dir))?;

        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;

        Ok(())
    }

    /// Get the path to the .codevec directory
    pub fn codevec_dir(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR)
    }

    /// Vector index root directory
    pub fn index_root(&self, root: &Path) -> PathBuf {
        Self::codevec_dir(root).join(&self.storage.index_dir)
    }

    /// Full-text sidecar directory
    pub fn fts_root(&self, root: &Path) -> PathBuf {
        Self::codevec_dir(root).join(&self.storage.fts_dir)
    }

    /// Check if codevec is initialized in the given directory
    pub fn is_initialized(root: &Path) -> bool {
        Self::codevec_dir(root).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.indexer.extensions.contains(&"rs".to_string()));
        assert!(config.indexer.extensions.contains(&"py".to_string()));
        assert_eq!(config.indexer.chunk_size, 2048);
        assert_eq!(config.embeddings.model, "nomic-embed-text-v1.5");
        assert!((config.indexer.batch_token_safety_fraction - 0.9).abs() < 1e-9);
        assert_eq!(config.indexer.vector_processing_timeout_seconds, 300);
        assert_eq!(config.indexer.throttle_window_seconds, 10);
        assert_eq!(config.indexer.throughput_window_seconds, 30);
    }

    #[test]
    fn test_slot_capacity_derived_from_workers() {
        let config = IndexerConfig {
            worker_count: Some(6),
            ..Default::default()
        };
        assert_eq!(config.effective_worker_count(), 6);
        assert_eq!(config.slot_capacity(), 8);
    }

    #[test]
    fn test_timeout_clamped_to_minimum() {
        let config = IndexerConfig {
            vector_processing_timeout_seconds: 30,
            ..Default::default()
        };
        assert_eq!(config.vector_processing_timeout(), Duration::from_secs(300));

        let config = IndexerConfig {
            vector_processing_timeout_seconds: 600,
            ..Default::default()
        };
        assert_eq!(config.vector_processing_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_extension_predicate() {
        let config = IndexerConfig::default();
        assert!(config.indexes_extension(Path::new("src/main.rs")));
        assert!(config.indexes_extension(Path::new("app.py")));
        assert!(!config.indexes_extension(Path::new("notes.md")));
        assert!(!config.indexes_extension(Path::new("Makefile")));
    }

    #[test]
    fn test_ignore_patterns_match_whole_components() {
        let config = IndexerConfig::default();
        assert!(config.ignores_component(std::ffi::OsStr::new("target")));
        assert!(config.ignores_component(std::ffi::OsStr::new("node_modules")));
        // Substring overlap is not a match
        assert!(!config.ignores_component(std::ffi::OsStr::new("builder.rs")));
        assert!(!config.ignores_component(std::ffi::OsStr::new("vendor-app")));
        assert!(!config.ignores_component(std::ffi::OsStr::new("retarget")));
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempdir().unwrap();
        let config = Config::default();

        config.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();

        assert_eq!(config.indexer.extensions, loaded.indexer.extensions);
        assert_eq!(config.embeddings.model, loaded.embeddings.model);
    }

    #[test]
    fn test_load_missing_config_returns_default() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();

        assert_eq!(config.indexer.chunk_size, 2048);
    }
}
