//! Configuration management for the evaluation harness
//!
//! Loads provider profiles and run settings from TOML files and provides
//! runtime access. Command-line flags override what is loaded here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub eval: EvalConfig,
}

/// Wire protocol spoken by a provider profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// OpenAI chat completions, also served by Groq and other compatible hosts
    OpenaiCompatible,
    Anthropic,
    Gemini,
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub kind: ProviderKind,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Overrides the client's built-in endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub default_model: String,
    /// Requests per minute
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    /// Tokens per minute
    #[serde(default = "default_tpm")]
    pub tpm: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Additional attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed pause between failed attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Profile used when no provider is given on the command line
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_questions_path")]
    pub questions_path: String,
    /// Defaults to a per-variant file name, see [`default_results_path`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_path: Option<String>,
    /// Detailed response log; disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses_path: Option<String>,
    /// Run every extracted answer through the verifier
    #[serde(default)]
    pub verify: bool,
    /// Pause after each recorded question
    #[serde(default = "default_question_delay_ms")]
    pub question_delay_ms: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            questions_path: default_questions_path(),
            results_path: None,
            responses_path: None,
            verify: false,
            question_delay_ms: default_question_delay_ms(),
        }
    }
}

impl EvalConfig {
    /// Results file for this run, falling back to the per-variant default
    pub fn results_path(&self) -> PathBuf {
        self.results_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| default_results_path(self.verify))
    }
}

/// Results file name used when none is configured
pub fn default_results_path(verify: bool) -> PathBuf {
    if verify {
        PathBuf::from("model_accuracy_results_verified.json")
    } else {
        PathBuf::from("model_accuracy_results.json")
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_rpm() -> u32 { 30 }
fn default_tpm() -> u32 { 100_000 }
fn default_max_tokens() -> u32 { 8192 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 2_000 }
fn default_timeout_ms() -> u64 { 300_000 }
fn default_provider() -> String { "groq".to_string() }
fn default_questions_path() -> String { "gpqa_questions.json".to_string() }
fn default_question_delay_ms() -> u64 { 1_000 }

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from default config location or return defaults
    pub fn load_or_default() -> Self {
        let config_paths = [
            "config/mcq-eval.toml",
            "../config/mcq-eval.toml",
            "mcq-eval/config/mcq-eval.toml",
        ];

        for path in &config_paths {
            if let Ok(config) = Self::from_file(path) {
                tracing::info!("Loaded configuration from {}", path);
                return config;
            }
        }

        tracing::info!("Using default configuration");
        Self::default()
    }

    /// Save configuration to a TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get enabled providers
    pub fn enabled_providers(&self) -> Vec<&ProviderConfig> {
        self.providers.values().filter(|p| p.enabled).collect()
    }

    /// Get a specific provider config
    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = BTreeMap::new();

        // High-throughput host: short fixed backoff, few retries
        providers.insert(
            "groq".to_string(),
            ProviderConfig {
                name: "groq".to_string(),
                enabled: true,
                kind: ProviderKind::OpenaiCompatible,
                api_key_env: "GROQ_API_KEY".to_string(),
                base_url: Some("https://api.groq.com/openai/v1".to_string()),
                default_model: "deepseek-r1-distill-llama-70b".to_string(),
                rpm: 30,
                tpm: 100_000,
                max_tokens: 8192,
                temperature: None,
                top_p: None,
                top_k: None,
                max_retries: 3,
                retry_delay_ms: 2_000,
                timeout_ms: default_timeout_ms(),
            },
        );

        // Aggressively rate limited: long fixed backoff, effectively unbounded retries
        providers.insert(
            "gemini".to_string(),
            ProviderConfig {
                name: "gemini".to_string(),
                enabled: true,
                kind: ProviderKind::Gemini,
                api_key_env: "GEMINI_API_KEY".to_string(),
                base_url: None,
                default_model: "gemini-2.0-flash-thinking-exp-01-21".to_string(),
                rpm: 10,
                tpm: 4_000_000,
                max_tokens: 65_536,
                temperature: Some(0.7),
                top_p: Some(0.95),
                top_k: Some(64),
                max_retries: 1_000,
                retry_delay_ms: 15_000,
                timeout_ms: default_timeout_ms(),
            },
        );

        providers.insert(
            "openai".to_string(),
            ProviderConfig {
                name: "openai".to_string(),
                enabled: true,
                kind: ProviderKind::OpenaiCompatible,
                api_key_env: "OPENAI_API_KEY".to_string(),
                base_url: None,
                default_model: "gpt-4o".to_string(),
                rpm: 500,
                tpm: 200_000,
                max_tokens: 8192,
                temperature: None,
                top_p: None,
                top_k: None,
                max_retries: 3,
                retry_delay_ms: 2_000,
                timeout_ms: default_timeout_ms(),
            },
        );

        providers.insert(
            "anthropic".to_string(),
            ProviderConfig {
                name: "anthropic".to_string(),
                enabled: true,
                kind: ProviderKind::Anthropic,
                api_key_env: "ANTHROPIC_API_KEY".to_string(),
                base_url: None,
                default_model: "claude-sonnet-4-5-20250929".to_string(),
                rpm: 1_000,
                tpm: 450_000,
                max_tokens: 8192,
                temperature: None,
                top_p: None,
                top_k: None,
                max_retries: 3,
                retry_delay_ms: 5_000,
                timeout_ms: default_timeout_ms(),
            },
        );

        Self {
            providers,
            eval: EvalConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown provider profile: {0}")]
    UnknownProvider(String),
}
