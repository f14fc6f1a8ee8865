//! Configuration loading, validation, and management for socmate.
//!
//! Loads configuration from `~/.socmate/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.socmate/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model name sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// System prompt prepended to every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Agent loop, compaction and supervision settings
    #[serde(default)]
    pub agent: AgentConfig,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_request_timeout_secs() -> u64 {
    300
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("agent", &self.agent)
            .finish()
    }
}

/// Tuning knobs of the agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Absolute context ceiling the compaction thresholds are fractions of.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Fraction of the ceiling above which tool outputs get pruned.
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: f64,

    /// Tool-output tokens, counted from the newest, that pruning never touches.
    #[serde(default = "default_prune_protect_tokens")]
    pub prune_protect_tokens: usize,

    /// Pruning is skipped unless it would save at least this many tokens.
    #[serde(default = "default_prune_minimum_savings")]
    pub prune_minimum_savings: usize,

    /// Fraction of the ceiling above which the old prefix gets summarised.
    #[serde(default = "default_compact_threshold")]
    pub compact_threshold: f64,

    /// Messages kept verbatim after summarisation.
    #[serde(default = "default_keep_recent_messages")]
    pub keep_recent_messages: usize,

    /// Safety cap on loop iterations per user query.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Attempts on transient transport errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Sampling temperature for the main loop.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Sampling temperature for the summarisation request.
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f32,

    /// No-progress window before a stall is reported.
    #[serde(default = "default_stuck_threshold_seconds")]
    pub stuck_threshold_seconds: u64,

    /// On a stall, queue a message asking the model for a progress report.
    #[serde(default = "default_true")]
    pub auto_status_check: bool,

    /// Master switch for stall detection.
    #[serde(default = "default_true")]
    pub enable_stuck_detection: bool,

    /// Heartbeat period while streaming.
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,

    /// Base delay between retries; attempt `n` waits `n` times this.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_context_tokens() -> usize {
    128_000
}
fn default_prune_threshold() -> f64 {
    0.60
}
fn default_prune_protect_tokens() -> usize {
    5_000
}
fn default_prune_minimum_savings() -> usize {
    1_000
}
fn default_compact_threshold() -> f64 {
    0.80
}
fn default_keep_recent_messages() -> usize {
    10
}
fn default_max_iterations() -> u32 {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_temperature() -> f32 {
    0.2
}
fn default_summary_temperature() -> f32 {
    0.1
}
fn default_stuck_threshold_seconds() -> u64 {
    60
}
fn default_heartbeat_interval_seconds() -> u64 {
    5
}
fn default_retry_backoff_ms() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            prune_threshold: default_prune_threshold(),
            prune_protect_tokens: default_prune_protect_tokens(),
            prune_minimum_savings: default_prune_minimum_savings(),
            compact_threshold: default_compact_threshold(),
            keep_recent_messages: default_keep_recent_messages(),
            max_iterations: default_max_iterations(),
            max_retries: default_max_retries(),
            temperature: default_temperature(),
            summary_temperature: default_summary_temperature(),
            stuck_threshold_seconds: default_stuck_threshold_seconds(),
            auto_status_check: true,
            enable_stuck_detection: true,
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl AgentConfig {
    /// Token count above which tool-output pruning runs.
    pub fn prune_trigger_tokens(&self) -> usize {
        (self.prune_threshold * self.max_context_tokens as f64) as usize
    }

    /// Token count above which prefix summarisation runs.
    pub fn compact_trigger_tokens(&self) -> usize {
        (self.compact_threshold * self.max_context_tokens as f64) as usize
    }

    /// Validate the agent settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_context_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_context_tokens must be > 0".into(),
            ));
        }

        if !(self.prune_threshold > 0.0 && self.prune_threshold < 1.0) {
            return Err(ConfigError::ValidationError(
                "agent.prune_threshold must be between 0.0 and 1.0 (exclusive)".into(),
            ));
        }

        if !(self.compact_threshold > 0.0 && self.compact_threshold < 1.0) {
            return Err(ConfigError::ValidationError(
                "agent.compact_threshold must be between 0.0 and 1.0 (exclusive)".into(),
            ));
        }

        if self.prune_threshold > self.compact_threshold {
            return Err(ConfigError::ValidationError(
                "agent.prune_threshold must not exceed agent.compact_threshold".into(),
            ));
        }

        for (name, value) in [
            ("temperature", self.temperature),
            ("summary_temperature", self.summary_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "agent.{name} must be between 0.0 and 2.0"
                )));
            }
        }

        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.heartbeat_interval_seconds must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.socmate/config.toml).
    ///
    /// Environment variables take priority over the file:
    /// - `SOCMATE_API_KEY`, then `OPENAI_API_KEY` (only if no key is configured)
    /// - `SOCMATE_API_URL`
    /// - `SOCMATE_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load `path` (defaults if missing), then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (injectable for tests).
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("SOCMATE_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }

        if let Some(url) = lookup("SOCMATE_API_URL") {
            self.api_url = url;
        }

        if let Some(model) = lookup("SOCMATE_MODEL") {
            self.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".socmate")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::ValidationError("api_url must not be empty".into()));
        }

        self.agent.validate()
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            system_prompt: None,
            request_timeout_secs: default_request_timeout_secs(),
            agent: AgentConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
