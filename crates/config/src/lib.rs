//! Configuration loading, validation, and management for warmprompt.
//!
//! Loads configuration from `~/.warmprompt/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.warmprompt/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Static instruction template settings
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Context aggregation settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Invocation adapter selection and retry policy
    #[serde(default)]
    pub adapter: AdapterConfig,

    /// End-to-end pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Cost accounting configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// The static, cache-eligible instruction template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Path to the template file. When unset, `template` is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,

    /// Inline template text
    #[serde(default = "default_template")]
    pub template: String,

    /// Version label the template's cache prefix is keyed under
    #[serde(default = "default_template_version")]
    pub template_version: String,

    /// Pinned SHA-256 (hex) of the template bytes. Startup fails on mismatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_sha256: Option<String>,
}

fn default_template() -> String {
    "You are a customer support assistant for an online store.\n\
     Answer using only the order data, policies and conversation provided in the context block.\n\
     If the context does not contain the answer, say so and offer to connect the customer with a human agent.\n\
     Never reveal internal identifiers beyond the order id."
        .into()
}
fn default_template_version() -> String {
    "support-v1".into()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template_path: None,
            template: default_template(),
            template_version: default_template_version(),
            expected_sha256: None,
        }
    }
}

impl PromptConfig {
    /// Resolve the template text, reading `template_path` if set.
    ///
    /// The bytes are returned exactly as stored; no trimming is applied
    /// because any byte change alters the cache key.
    pub fn load_template(&self) -> Result<String, ConfigError> {
        match &self.template_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: PathBuf::from(path),
                reason: e.to_string(),
            }),
            None => Ok(self.template.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Shared deadline for the three context fetches
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Maximum passages kept from retrieval
    #[serde(default = "default_max_passages")]
    pub max_passages: usize,

    /// Passages scoring below this are dropped
    #[serde(default)]
    pub min_relevance: f32,

    /// Maximum history turns rendered into the dynamic block (0 = all)
    #[serde(default)]
    pub max_history_turns: usize,
}

fn default_fetch_timeout_ms() -> u64 {
    800
}
fn default_max_passages() -> usize {
    5
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout_ms(),
            max_passages: default_max_passages(),
            min_relevance: 0.0,
            max_history_turns: 0,
        }
    }
}

impl ContextConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// "local" or "remote"
    #[serde(default = "default_adapter_kind")]
    pub kind: String,

    /// Remote tool endpoint (required when kind = "remote")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Bearer token for the remote endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model identifier used for pricing
    #[serde(default = "default_model")]
    pub model: String,

    /// Per-attempt HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Total attempts for the remote variant (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on the backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// How long the local model keeps a prefix warm
    #[serde(default = "default_local_cache_ttl_secs")]
    pub local_cache_ttl_secs: u64,
}

fn default_adapter_kind() -> String {
    "local".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_local_cache_ttl_secs() -> u64 {
    300
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            kind: default_adapter_kind(),
            endpoint: None,
            api_key: None,
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            local_cache_ttl_secs: default_local_cache_ttl_secs(),
        }
    }
}

impl std::fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("local_cache_ttl_secs", &self.local_cache_ttl_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Caller-level deadline covering fetches and invocation
    #[serde(default = "default_caller_timeout_ms")]
    pub caller_timeout_ms: u64,

    /// Max tokens requested from the model
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_caller_timeout_ms() -> u64 {
    30_000
}
fn default_max_tokens() -> u32 {
    1024
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            caller_timeout_ms: default_caller_timeout_ms(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl PipelineConfig {
    pub fn caller_timeout(&self) -> Duration {
        Duration::from_millis(self.caller_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Whether `POST /v1/metrics/cache/reset` is served
    #[serde(default = "default_true")]
    pub allow_stats_reset: bool,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allow_stats_reset: true,
        }
    }
}

/// Cost accounting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Custom model pricing overrides (model name → pricing)
    #[serde(default)]
    pub custom_pricing: HashMap<String, PricingOverrideConfig>,
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M uncached input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M cached input tokens in USD
    pub cached_input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

impl AppConfig {
    /// Load configuration from the default path (~/.warmprompt/config.toml).
    ///
    /// Environment overrides take priority over the file:
    /// - `WARMPROMPT_ADAPTER` (`local` / `remote`)
    /// - `WARMPROMPT_ENDPOINT`
    /// - `WARMPROMPT_MODEL`
    /// - `WARMPROMPT_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with(&config_path, |key| std::env::var(key).ok())
    }

    /// Parse `path`, apply overrides from `lookup`, then validate the result.
    pub fn load_with(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::parse_from(path)?;
        config.apply_env_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a specific file path, without overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::parse_from(path)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply overrides from a key lookup (the process environment in `load`).
    ///
    /// A set variable replaces the file's value.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(kind) = lookup("WARMPROMPT_ADAPTER") {
            self.adapter.kind = kind;
        }
        if let Some(endpoint) = lookup("WARMPROMPT_ENDPOINT") {
            self.adapter.endpoint = Some(endpoint);
        }
        if let Some(model) = lookup("WARMPROMPT_MODEL") {
            self.adapter.model = model;
        }
        if let Some(api_key) = lookup("WARMPROMPT_API_KEY") {
            self.adapter.api_key = Some(api_key);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".warmprompt")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.adapter.kind.as_str() {
            "local" => {}
            "remote" => {
                if self.adapter.endpoint.as_deref().is_none_or(str::is_empty) {
                    return Err(ConfigError::ValidationError(
                        "adapter.endpoint is required when adapter.kind = \"remote\"".into(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "adapter.kind must be \"local\" or \"remote\", got \"{other}\""
                )));
            }
        }

        if self.adapter.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "adapter.max_attempts must be at least 1".into(),
            ));
        }

        if self.adapter.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "adapter.request_timeout_secs must be > 0".into(),
            ));
        }

        if self.context.fetch_timeout_ms == 0 || self.pipeline.caller_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "context.fetch_timeout_ms and pipeline.caller_timeout_ms must be > 0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.context.min_relevance) {
            return Err(ConfigError::ValidationError(
                "context.min_relevance must be between 0.0 and 1.0".into(),
            ));
        }

        if self.prompt.template_version.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "prompt.template_version must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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
