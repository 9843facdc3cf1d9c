//! Configuration loading, validation, and management for DeepDive.
//!
//! Loads configuration from `~/.deepdive/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use deepdive_core::ToolKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Hard ceiling on generation steps per user message.
pub const MAX_STEPS: u32 = 10;
/// Hard ceiling on search results handed to the model.
pub const MAX_SEARCH_RESULTS: usize = 5;
/// Hard ceiling on characters kept per search result.
pub const MAX_CONTENT_BUDGET: usize = 500;

/// The root configuration structure.
///
/// Maps directly to `~/.deepdive/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the generation provider (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per generation step
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Orchestration loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Search provider settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
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
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("search", &self.search)
            .field("gateway", &self.gateway)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("max_results", &self.max_results)
            .field("search_depth", &self.search_depth)
            .field("content_budget", &self.content_budget)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Settings for the step orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on generation steps per user message
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Messages at the tail of history that keep full tool detail
    #[serde(default = "default_prune_keep_last")]
    pub prune_keep_last: usize,

    /// How long a client tool or approval may stay pending
    #[serde(default = "default_external_timeout")]
    pub external_timeout_secs: u64,

    /// Tool names that need explicit approval before running
    #[serde(default)]
    pub require_approval: Vec<String>,

    /// Appended to the research directive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_instructions: Option<String>,
}

fn default_max_steps() -> u32 {
    10
}
fn default_prune_keep_last() -> usize {
    2
}
fn default_external_timeout() -> u64 {
    120
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            prune_keep_last: default_prune_keep_last(),
            external_timeout_secs: default_external_timeout(),
            require_approval: vec![],
            extra_instructions: None,
        }
    }
}

impl AgentConfig {
    /// Resolve `require_approval` to tool kinds.
    pub fn approval_kinds(&self) -> Result<Vec<ToolKind>, ConfigError> {
        self.require_approval
            .iter()
            .map(|name| {
                ToolKind::from_name(name).ok_or_else(|| {
                    ConfigError::ValidationError(format!(
                        "agent.require_approval names unknown tool '{name}'"
                    ))
                })
            })
            .collect()
    }
}

/// Web search provider settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_search_url")]
    pub base_url: String,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default = "default_search_depth")]
    pub search_depth: String,

    /// Characters of body text kept per result
    #[serde(default = "default_content_budget")]
    pub content_budget: usize,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

fn default_search_url() -> String {
    "https://api.tavily.com".into()
}
fn default_max_results() -> usize {
    5
}
fn default_search_depth() -> String {
    "basic".into()
}
fn default_content_budget() -> usize {
    500
}
fn default_search_timeout() -> u64 {
    20
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_search_url(),
            max_results: default_max_results(),
            search_depth: default_search_depth(),
            content_budget: default_content_budget(),
            timeout_secs: default_search_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
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
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.deepdive/config.toml).
    ///
    /// Environment variables override the file:
    /// - `DEEPDIVE_API_KEY`, `OPENROUTER_API_KEY`, `OPENAI_API_KEY` (model key, in that order)
    /// - `DEEPDIVE_PROVIDER`, `DEEPDIVE_MODEL`
    /// - `DEEPDIVE_SEARCH_API_KEY`, `TAVILY_API_KEY` (search key)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
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

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("DEEPDIVE_API_KEY")
                .or_else(|| lookup("OPENROUTER_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(provider) = lookup("DEEPDIVE_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("DEEPDIVE_MODEL") {
            self.default_model = model;
        }

        if let Some(key) = lookup("DEEPDIVE_SEARCH_API_KEY").or_else(|| lookup("TAVILY_API_KEY")) {
            self.search.api_key = Some(key);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".deepdive")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(1..=MAX_STEPS).contains(&self.agent.max_steps) {
            return Err(ConfigError::ValidationError(format!(
                "agent.max_steps must be between 1 and {MAX_STEPS}"
            )));
        }

        if !(1..=MAX_SEARCH_RESULTS).contains(&self.search.max_results) {
            return Err(ConfigError::ValidationError(format!(
                "search.max_results must be between 1 and {MAX_SEARCH_RESULTS}"
            )));
        }

        if !(1..=MAX_CONTENT_BUDGET).contains(&self.search.content_budget) {
            return Err(ConfigError::ValidationError(format!(
                "search.content_budget must be between 1 and {MAX_CONTENT_BUDGET}"
            )));
        }

        self.agent.approval_kinds()?;
        Ok(())
    }

    /// Check if an API key is available for the default provider, either
    /// globally (config or environment) or on its `[providers.<name>]` table.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
            || self
                .providers
                .get(&self.default_provider)
                .is_some_and(|p| p.api_key.is_some())
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
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            search: SearchConfig::default(),
            gateway: GatewayConfig::default(),
            providers: HashMap::new(),
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
        assert_eq!(config.default_provider, "openrouter");
        assert_eq!(config.agent.max_steps, 10);
        assert_eq!(config.agent.prune_keep_last, 2);
        assert_eq!(config.search.max_results, 5);
        assert_eq!(config.search.content_budget, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.search.search_depth, "basic");
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_steps_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn limits_above_ceiling_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_steps = 25;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("agent.max_steps"));

        let mut config = AppConfig::default();
        config.search.max_results = 20;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("search.max_results"));

        let mut config = AppConfig::default();
        config.search.content_budget = 5000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("search.content_budget"));

        let mut config = AppConfig::default();
        config.agent.max_steps = MAX_STEPS;
        config.search.max_results = MAX_SEARCH_RESULTS;
        config.search.content_budget = MAX_CONTENT_BUDGET;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn oversized_step_cap_in_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent]\nmax_steps = 25").unwrap();
        assert!(AppConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn provider_table_key_counts_as_api_key() {
        let mut config = AppConfig::default();
        assert!(!config.has_api_key());
        config.providers.insert(
            config.default_provider.clone(),
            ProviderConfig {
                api_key: Some("sk-or-provider".into()),
                api_url: None,
                default_model: None,
            },
        );
        assert!(config.has_api_key());
    }

    #[test]
    fn unknown_approval_tool_rejected() {
        let mut config = AppConfig::default();
        config.agent.require_approval = vec!["shell".into()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("shell"));

        config.agent.require_approval = vec!["webSearch".into()];
        assert_eq!(
            config.agent.approval_kinds().unwrap(),
            vec![ToolKind::WebSearch]
        );
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().default_provider, "openrouter");
    }

    #[test]
    fn load_from_file_with_partial_tables() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_model = "openai/gpt-4o"

[agent]
max_steps = 4
require_approval = ["webSearch"]

[search]
base_url = "http://localhost:9000"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_model, "openai/gpt-4o");
        assert_eq!(config.agent.max_steps, 4);
        assert_eq!(config.agent.external_timeout_secs, 120);
        assert_eq!(config.search.base_url, "http://localhost:9000");
        assert_eq!(config.search.max_results, 5);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent\nmax_steps = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-openai"),
            ("DEEPDIVE_MODEL", "openai/gpt-4o"),
            ("TAVILY_API_KEY", "tvly-key"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.default_model, "openai/gpt-4o");
        assert_eq!(config.search.api_key.as_deref(), Some("tvly-key"));
    }

    #[test]
    fn file_api_key_wins_over_env() {
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(|k| (k == "DEEPDIVE_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        config.search.api_key = Some("tvly-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("tvly-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter"));
        assert!(toml_str.contains("max_steps = 10"));
    }
}
