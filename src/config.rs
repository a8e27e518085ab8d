//! Configuration for the sensitivity pipeline
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `SENTINEL__`-prefixed environment variables (`SENTINEL__SESSION__TOKEN_BUDGET=2000`).

use crate::error::{Result, SentinelError};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file plus environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(Some(path.as_ref()))
    }

    /// Load configuration from environment only
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    fn load(path: Option<&Path>) -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("SENTINEL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SentinelError::Configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        self.scheduler.validate()?;
        if self.retry.max_attempts == 0 {
            return Err(SentinelError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Model backend configuration (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// API key; falls back to the env var named by `api_key_env`
    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// HTTP client timeout in milliseconds
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Use tiktoken for token counting instead of the word heuristic
    #[serde(default = "default_use_tiktoken")]
    pub use_tiktoken: bool,
}

fn default_endpoint() -> String {
    "http://localhost:8080/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_http_timeout_ms() -> u64 {
    60_000
}

fn default_temperature() -> f32 {
    0.2
}

fn default_use_tiktoken() -> bool {
    true
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            api_key_env: default_api_key_env(),
            http_timeout_ms: default_http_timeout_ms(),
            temperature: default_temperature(),
            use_tiktoken: default_use_tiktoken(),
        }
    }
}

impl ModelConfig {
    /// Resolve the API key from config or the configured env var
    pub fn resolve_api_key(&self) -> Option<SecretString> {
        self.api_key.clone().or_else(|| {
            std::env::var(&self.api_key_env)
                .ok()
                .filter(|v| !v.is_empty())
                .map(SecretString::new)
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

/// Session manager configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Token budget for system prompt + message before truncation kicks in
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    #[serde(default = "default_head_words")]
    pub head_words: usize,

    #[serde(default = "default_middle_words")]
    pub middle_words: usize,

    #[serde(default = "default_tail_words")]
    pub tail_words: usize,

    /// Wall-clock timeout per model call in milliseconds
    #[serde(default = "default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,
}

fn default_token_budget() -> usize {
    1500
}

fn default_head_words() -> usize {
    400
}

fn default_middle_words() -> usize {
    200
}

fn default_tail_words() -> usize {
    200
}

fn default_prompt_timeout_ms() -> u64 {
    30_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            head_words: default_head_words(),
            middle_words: default_middle_words(),
            tail_words: default_tail_words(),
            prompt_timeout_ms: default_prompt_timeout_ms(),
        }
    }
}

impl SessionConfig {
    pub const MIN_TOKEN_BUDGET: usize = 1500;
    pub const MAX_TOKEN_BUDGET: usize = 2500;

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_TOKEN_BUDGET..=Self::MAX_TOKEN_BUDGET).contains(&self.token_budget) {
            return Err(SentinelError::Configuration(format!(
                "session.token_budget must be within {}-{}, got {}",
                Self::MIN_TOKEN_BUDGET,
                Self::MAX_TOKEN_BUDGET,
                self.token_budget
            )));
        }
        if self.head_words == 0 || self.tail_words == 0 {
            return Err(SentinelError::Configuration(
                "session head/tail windows must be non-empty".to_string(),
            ));
        }
        if self.prompt_timeout_ms == 0 {
            return Err(SentinelError::Configuration(
                "session.prompt_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Batch scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_concurrency_cap")]
    pub concurrency_cap: usize,

    /// Attempts per segment before a permanent failure; `None` retries forever
    #[serde(default = "default_max_job_attempts")]
    pub max_attempts: Option<u32>,

    /// Segments at or below this many characters are not analysed
    #[serde(default = "default_min_segment_chars")]
    pub min_segment_chars: usize,
}

fn default_concurrency_cap() -> usize {
    8
}

fn default_max_job_attempts() -> Option<u32> {
    Some(5)
}

fn default_min_segment_chars() -> usize {
    100
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_cap: default_concurrency_cap(),
            max_attempts: default_max_job_attempts(),
            min_segment_chars: default_min_segment_chars(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_cap == 0 {
            return Err(SentinelError::Configuration(
                "scheduler.concurrency_cap must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(SentinelError::Configuration(
                "scheduler.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry executor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Verdict cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    #[serde(default = "default_cache_capacity")]
    pub capacity: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_capacity() -> u64 {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Key-value store configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// JSON file backing the store; in-memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
