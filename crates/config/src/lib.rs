//! Configuration loading, validation, and management for Concierge.
//!
//! Loads configuration from `~/.concierge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use concierge_core::ToolFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.concierge/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub provider: ProviderConfig,

    /// Model tiers
    #[serde(default)]
    pub models: ModelsConfig,

    /// Tool loop settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Rate-limit retry schedule
    #[serde(default)]
    pub retry: RetryConfig,

    /// Tool result size bounds
    #[serde(default)]
    pub compressor: CompressorConfig,

    /// Model tier heuristics
    #[serde(default)]
    pub complexity: ComplexityConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Monthly spend ceiling
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Conversation store
    #[serde(default)]
    pub store: StoreConfig,

    /// Business backend tools forwarded over HTTP
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<HttpToolConfig>,

    /// Which tools are exposed for which requests
    #[serde(default)]
    pub tool_filter: ToolFilter,

    /// Custom model pricing overrides (model name → pricing)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub pricing: HashMap<String, PricingOverrideConfig>,
}

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
            .field("provider", &self.provider)
            .field("models", &self.models)
            .field("engine", &self.engine)
            .field("retry", &self.retry)
            .field("compressor", &self.compressor)
            .field("complexity", &self.complexity)
            .field("gateway", &self.gateway)
            .field("budget", &self.budget)
            .field("store", &self.store)
            .field("tools", &self.tools)
            .field("tool_filter", &self.tool_filter)
            .field("pricing", &self.pricing)
            .finish()
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_provider_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Fast, inexpensive tier
    #[serde(default = "default_cheap_model")]
    pub cheap: String,

    /// Slower tier for complex requests
    #[serde(default = "default_capable_model")]
    pub capable: String,

    /// Model used for document extraction
    #[serde(default = "default_cheap_model")]
    pub extraction: String,
}

fn default_cheap_model() -> String {
    "claude-3-5-haiku-latest".into()
}
fn default_capable_model() -> String {
    "claude-sonnet-4-20250514".into()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            cheap: default_cheap_model(),
            capable: default_capable_model(),
            extraction: default_cheap_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many prior messages are sent to the provider
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    #[serde(default = "default_standard_max_tokens")]
    pub standard_max_tokens: u32,

    #[serde(default = "default_extended_max_tokens")]
    pub extended_max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_history_window() -> usize {
    20
}
fn default_max_tool_rounds() -> usize {
    8
}
fn default_standard_max_tokens() -> u32 {
    4096
}
fn default_extended_max_tokens() -> u32 {
    8192
}
fn default_temperature() -> f32 {
    0.3
}
fn default_system_prompt() -> String {
    "You are the business assistant for a project and quotation management platform. \
     Use the available tools to look up or change data instead of guessing, \
     and answer concisely."
        .into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_tool_rounds: default_max_tool_rounds(),
            standard_max_tokens: default_standard_max_tokens(),
            extended_max_tokens: default_extended_max_tokens(),
            temperature: default_temperature(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before each retry; the last entry repeats if retries outnumber it
    #[serde(default = "default_delays_ms")]
    pub delays_ms: Vec<u64>,
}

fn default_max_retries() -> u32 {
    3
}
fn default_delays_ms() -> Vec<u64> {
    vec![2000, 5000, 10000]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delays_ms: default_delays_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressorConfig {
    #[serde(default = "default_max_result_bytes")]
    pub max_result_bytes: usize,

    #[serde(default = "default_max_list_items")]
    pub max_list_items: usize,
}

fn default_max_result_bytes() -> usize {
    8000
}
fn default_max_list_items() -> usize {
    20
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            max_result_bytes: default_max_result_bytes(),
            max_list_items: default_max_list_items(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityConfig {
    /// Messages longer than this go to the capable tier
    #[serde(default = "default_word_threshold")]
    pub word_threshold: usize,

    /// Follow-ups to an assistant turn with more tool calls than this go to the capable tier
    #[serde(default = "default_tool_count_threshold")]
    pub tool_count_threshold: usize,

    #[serde(default = "default_capable_keywords")]
    pub capable_keywords: Vec<String>,

    /// Keywords that raise the token ceiling to the extended value
    #[serde(default = "default_extended_keywords")]
    pub extended_keywords: Vec<String>,
}

fn default_word_threshold() -> usize {
    60
}
fn default_tool_count_threshold() -> usize {
    2
}
fn default_capable_keywords() -> Vec<String> {
    [
        "quote",
        "quotation",
        "analysis",
        "analyze",
        "compare",
        "comparison",
        "schedule",
        "planning",
        "budget",
        "valuation",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_extended_keywords() -> Vec<String> {
    ["pdf", "document", "analyze", "analysis", "contract", "report"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        Self {
            word_threshold: default_word_threshold(),
            tool_count_threshold: default_tool_count_threshold(),
            capable_keywords: default_capable_keywords(),
            extended_keywords: default_extended_keywords(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Requests declaring a larger body are rejected before parsing
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    /// Bearer tokens accepted by the gateway
    #[serde(default)]
    pub tokens: Vec<ApiTokenConfig>,

    /// Origins allowed by CORS; empty means same-origin only
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_request_bytes() -> usize {
    4_000_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_request_bytes: default_max_request_bytes(),
            tokens: vec![],
            allowed_origins: vec![],
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ApiTokenConfig {
    pub token: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl std::fmt::Debug for ApiTokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiTokenConfig")
            .field("token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Monthly ceiling in USD; 0 disables the check
    #[serde(default = "default_monthly_limit")]
    pub monthly_limit_usd: f64,

    /// Usage percentage at which responses carry a warning
    #[serde(default = "default_warn_percent")]
    pub warn_at_percent: f64,
}

fn default_monthly_limit() -> f64 {
    50.0
}
fn default_warn_percent() -> f64 {
    80.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_limit_usd: default_monthly_limit(),
            warn_at_percent: default_warn_percent(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    /// SQLite file path; defaults to `~/.concierge/concierge.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("concierge.db"))
    }
}

/// A business capability exposed to the model and served by an HTTP backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpToolConfig {
    pub name: String,

    pub description: String,

    /// JSON Schema for the tool input
    #[serde(default = "default_schema")]
    pub parameters: serde_json::Value,

    /// Endpoint that receives `POST {input, context}`
    pub endpoint: String,

    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}
fn default_tool_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

impl AppConfig {
    /// Load configuration from the default path (~/.concierge/config.toml),
    /// then apply environment overrides:
    /// - `CONCIERGE_API_KEY`, then `ANTHROPIC_API_KEY`
    /// - `CONCIERGE_PROVIDER_URL`
    /// - `CONCIERGE_PORT`
    /// - `CONCIERGE_MONTHLY_LIMIT_USD`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from a specific path and apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
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

    /// Apply overrides from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(key) = lookup("CONCIERGE_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY")) {
            self.api_key = Some(key);
        }

        if let Some(url) = lookup("CONCIERGE_PROVIDER_URL") {
            self.provider.base_url = url;
        }

        if let Some(port) = lookup("CONCIERGE_PORT") {
            self.gateway.port = port
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("CONCIERGE_PORT is not a port: {port}")))?;
        }

        if let Some(limit) = lookup("CONCIERGE_MONTHLY_LIMIT_USD") {
            self.budget.monthly_limit_usd = limit.parse().map_err(|_| {
                ConfigError::ValidationError(format!("CONCIERGE_MONTHLY_LIMIT_USD is not a number: {limit}"))
            })?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".concierge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.into()));

        if self.engine.history_window == 0 {
            return invalid("engine.history_window must be at least 1");
        }
        if self.engine.max_tool_rounds == 0 {
            return invalid("engine.max_tool_rounds must be at least 1");
        }
        if self.engine.standard_max_tokens == 0 {
            return invalid("engine.standard_max_tokens must be > 0");
        }
        if self.engine.extended_max_tokens < self.engine.standard_max_tokens {
            return invalid("engine.extended_max_tokens must be >= engine.standard_max_tokens");
        }
        if !(0.0..=1.0).contains(&self.engine.temperature) {
            return invalid("engine.temperature must be between 0.0 and 1.0");
        }
        if self.retry.max_retries > 0 && self.retry.delays_ms.is_empty() {
            return invalid("retry.delays_ms must not be empty when retries are enabled");
        }
        if self.compressor.max_result_bytes < 256 {
            return invalid("compressor.max_result_bytes must be at least 256");
        }
        if self.compressor.max_list_items == 0 {
            return invalid("compressor.max_list_items must be at least 1");
        }
        if self.budget.monthly_limit_usd < 0.0 {
            return invalid("budget.monthly_limit_usd must not be negative");
        }
        if self.gateway.max_request_bytes == 0 {
            return invalid("gateway.max_request_bytes must be > 0");
        }
        if let Some(tool) = self.tools.iter().find(|t| t.name.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "tool with endpoint {} has an empty name",
                tool.endpoint
            )));
        }

        Ok(())
    }

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
            provider: ProviderConfig::default(),
            models: ModelsConfig::default(),
            engine: EngineConfig::default(),
            retry: RetryConfig::default(),
            compressor: CompressorConfig::default(),
            complexity: ComplexityConfig::default(),
            gateway: GatewayConfig::default(),
            budget: BudgetConfig::default(),
            store: StoreConfig::default(),
            tools: vec![],
            tool_filter: ToolFilter::default(),
            pricing: HashMap::new(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.max_request_bytes, 4_000_000);
        assert_eq!(config.retry.delays_ms, vec![2000, 5000, 10000]);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.models.capable, config.models.capable);
        assert_eq!(parsed.engine.history_window, config.engine.history_window);
        assert_eq!(parsed.complexity.capable_keywords, config.complexity.capable_keywords);
    }

    #[test]
    fn extended_ceiling_below_standard_rejected() {
        let mut config = AppConfig::default();
        config.engine.extended_max_tokens = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_retry_schedule_rejected() {
        let mut config = AppConfig::default();
        config.retry.delays_ms.clear();
        assert!(config.validate().is_err());

        config.retry.max_retries = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.models.cheap, "claude-3-5-haiku-latest");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[engine]
history_window = 6

[[tools]]
name = "list_projects"
description = "List active projects"
endpoint = "http://localhost:9000/tools/list_projects"

[tool_filter]
always = ["list_projects"]
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.engine.history_window, 6);
        assert_eq!(config.engine.max_tool_rounds, 8);
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.tools[0].timeout_secs, 30);
        assert!(config.tools[0].enabled);
        assert_eq!(config.tool_filter.always, vec!["list_projects"]);
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "engine = 12").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config
            .apply_env(|key| match key {
                "ANTHROPIC_API_KEY" => Some("sk-ant-test".into()),
                "CONCIERGE_PORT" => Some("9090".into()),
                "CONCIERGE_MONTHLY_LIMIT_USD" => Some("12.5".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-ant-test"));
        assert_eq!(config.gateway.port, 9090);
        assert!((config.budget.monthly_limit_usd - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn bad_env_port_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|key| (key == "CONCIERGE_PORT").then(|| "eighty".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-ant-secret".into());
        config.gateway.tokens.push(ApiTokenConfig {
            token: "bearer-secret".into(),
            user_id: "u1".into(),
            display_name: None,
        });
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-ant-secret"));
        assert!(!debug.contains("bearer-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("claude-sonnet-4-20250514"));
        assert!(toml_str.contains("4000000"));
    }
}
