use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::{LLMConfig, LLMProvider};

/// Configuration for the flashcard service
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Job pipeline settings
    pub pipeline: PipelineConfig,

    /// Summarization settings
    pub summarizer: SummarizerConfig,

    /// Transcript source settings
    pub transcript: TranscriptConfig,

    /// Video metadata lookup settings
    pub metadata: MetadataConfig,

    /// Record persistence settings
    pub storage: StorageConfig,

    /// Stalled job detection
    pub sweeper: SweeperConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Origins allowed by CORS (empty = any)
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: Vec::new(),
        }
    }
}

/// What to do with a chunk whose summary could not be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SummaryFailurePolicy {
    /// Mark the chunk failed but keep a truncated-text flashcard for it
    #[default]
    Fallback,
    /// Mark the chunk failed and leave it out of the flashcard set
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Target chunk duration in seconds
    pub chunk_window_secs: u64,

    /// Minimum interval between progress writes (milliseconds)
    pub progress_persist_interval_ms: u64,

    /// Attempts for each in-flight store write
    pub store_retry_attempts: u32,

    /// Base backoff between store write attempts (milliseconds)
    pub store_retry_backoff_ms: u64,

    /// Jobs allowed to run at once in this process
    pub max_concurrent_jobs: usize,

    /// Keep completed Job Records instead of deleting them
    pub retain_completed_jobs: bool,

    /// Handling of chunks whose summarization failed
    pub summary_failure_policy: SummaryFailurePolicy,

    /// Identifies this process in claimed Job Records
    pub instance_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_window_secs: 300, // 5 minutes
            progress_persist_interval_ms: 2000,
            store_retry_attempts: 3,
            store_retry_backoff_ms: 200,
            max_concurrent_jobs: num_cpus::get().clamp(1, 8),
            retain_completed_jobs: false,
            summary_failure_policy: SummaryFailurePolicy::Fallback,
            instance_name: "flashcard-forge-1".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn chunk_window(&self) -> Duration {
        Duration::from_secs(self.chunk_window_secs)
    }

    pub fn progress_persist_interval(&self) -> Duration {
        Duration::from_millis(self.progress_persist_interval_ms)
    }

    pub fn store_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.store_retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SummarizerBackend {
    #[default]
    Extractive,
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Summarizer implementation
    pub backend: SummarizerBackend,

    /// Cap on normalized input length (characters)
    pub max_input_chars: usize,

    /// Cap on summary length (characters)
    pub max_summary_chars: usize,

    /// Tokens dropped during normalization
    pub filler_words: Vec<String>,

    /// Model settings for the `llm` backend
    pub llm: LLMConfig,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            backend: SummarizerBackend::Extractive,
            max_input_chars: 4000,
            max_summary_chars: 120,
            filler_words: ["um", "uh", "uhm", "erm", "er", "ah", "hmm", "mm"]
                .iter()
                .map(|w| w.to_string())
                .collect(),
            llm: LLMConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptProvider {
    /// Remote transcript service
    Http,
    /// Caption files on local disk
    #[default]
    Captions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Transcript source implementation
    pub provider: TranscriptProvider,

    /// Base URL of the transcript service (`http` provider)
    pub endpoint: Option<String>,

    /// Bearer token for the transcript service
    pub api_key: Option<String>,

    /// Directory of `<video_id>.srt` / `<video_id>.txt` files (`captions` provider)
    pub captions_dir: PathBuf,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Accept untimed transcripts with estimated offsets
    pub allow_synthetic_timing: bool,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            provider: TranscriptProvider::Captions,
            endpoint: None,
            api_key: None,
            captions_dir: PathBuf::from("./captions"),
            timeout_seconds: 60,
            allow_synthetic_timing: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// oEmbed lookup endpoint
    pub oembed_endpoint: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            oembed_endpoint: "https://www.youtube.com/oembed".to_string(),
            timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Root directory for the `file` backend
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,

    /// Minutes without a heartbeat before a processing job counts as stalled
    pub stall_threshold_minutes: u64,

    /// Seconds between sweeps
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stall_threshold_minutes: 10,
            interval_secs: 60,
        }
    }
}

impl SweeperConfig {
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_minutes * 60)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, the default locations,
    /// or defaults plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
            let mut config: Config = toml::from_str(&content)?;
            config.apply_env();
            tracing::info!("Loaded configuration from: {}", path.display());
            return Ok(config);
        }

        let config_paths = ["flashcard-forge.toml", "config/flashcard-forge.toml"];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(mut config) => {
                        config.apply_env();
                        tracing::info!("Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Ok(Self::from_env())
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("FLASHCARD_FORGE_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid FLASHCARD_FORGE_PORT: {}", port),
            }
        }

        if let Ok(dir) = std::env::var("FLASHCARD_FORGE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }

        if let Ok(api_key) = std::env::var("FLASHCARD_FORGE_LLM_API_KEY") {
            self.summarizer.llm.api_key = Some(api_key);
        }

        if let Ok(endpoint) = std::env::var("FLASHCARD_FORGE_TRANSCRIPT_ENDPOINT") {
            self.transcript.endpoint = Some(endpoint);
            self.transcript.provider = TranscriptProvider::Http;
        }

        if let Ok(level) = std::env::var("FLASHCARD_FORGE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.chunk_window_secs == 0 {
            return Err(anyhow!("chunk_window_secs must be greater than 0"));
        }

        if self.pipeline.max_concurrent_jobs == 0 {
            return Err(anyhow!("max_concurrent_jobs must be greater than 0"));
        }

        if self.pipeline.store_retry_attempts == 0 {
            return Err(anyhow!("store_retry_attempts must be at least 1"));
        }

        if self.summarizer.max_summary_chars == 0 || self.summarizer.max_input_chars == 0 {
            return Err(anyhow!("summarizer length limits must be greater than 0"));
        }

        if self.sweeper.enabled && self.sweeper.stall_threshold_minutes == 0 {
            return Err(anyhow!("stall_threshold_minutes must be greater than 0"));
        }

        if self.transcript.provider == TranscriptProvider::Http && self.transcript.endpoint.is_none() {
            return Err(anyhow!("Endpoint required for http transcript provider"));
        }

        if self.summarizer.backend == SummarizerBackend::Llm {
            let llm = &self.summarizer.llm;
            match llm.provider {
                LLMProvider::OpenAI | LLMProvider::Gemini if llm.api_key.is_none() => {
                    return Err(anyhow!("API key required for {:?} summarizer", llm.provider));
                }
                LLMProvider::LMStudio if llm.endpoint.is_none() => {
                    return Err(anyhow!("Endpoint required for LMStudio summarizer"));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Flashcard Forge Configuration:\n\
            - Listen: {}:{}\n\
            - Chunk Window: {}s\n\
            - Concurrent Jobs: {}\n\
            - Summarizer: {:?}\n\
            - Transcript Provider: {:?}\n\
            - Storage: {:?} ({})\n\
            - Stall Sweeper: {}",
            self.server.host,
            self.server.port,
            self.pipeline.chunk_window_secs,
            self.pipeline.max_concurrent_jobs,
            self.summarizer.backend,
            self.transcript.provider,
            self.storage.backend,
            self.storage.data_dir.display(),
            if self.sweeper.enabled { "on" } else { "off" }
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_chunk_window(mut self, window: Duration) -> Self {
        self.config.pipeline.chunk_window_secs = window.as_secs();
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.config.pipeline.progress_persist_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_store_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.config.pipeline.store_retry_attempts = attempts;
        self.config.pipeline.store_retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_summary_failure_policy(mut self, policy: SummaryFailurePolicy) -> Self {
        self.config.pipeline.summary_failure_policy = policy;
        self
    }

    pub fn retain_completed_jobs(mut self, retain: bool) -> Self {
        self.config.pipeline.retain_completed_jobs = retain;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.config.pipeline.max_concurrent_jobs = jobs;
        self
    }

    pub fn with_storage(mut self, backend: StorageBackend, data_dir: PathBuf) -> Self {
        self.config.storage.backend = backend;
        self.config.storage.data_dir = data_dir;
        self
    }

    pub fn with_captions_dir(mut self, dir: PathBuf) -> Self {
        self.config.transcript.provider = TranscriptProvider::Captions;
        self.config.transcript.captions_dir = dir;
        self
    }

    pub fn with_stall_threshold(mut self, minutes: u64) -> Self {
        self.config.sweeper.stall_threshold_minutes = minutes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl From<Config> for ConfigBuilder {
    fn from(config: Config) -> Self {
        Self { config }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
