//! Configuration loading, validation, and management for deskpilot.
//!
//! Loads configuration from `~/.deskpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

pub mod rules;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use rules::{FileRules, RulesFile, StoredRule, policy_provider};

/// The root configuration structure.
///
/// Maps directly to `~/.deskpilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language-model API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default language-model provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Commerce/subscription backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Dispatch loop settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Session persistence
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Dynamic handler rules
    #[serde(default)]
    pub policies: PoliciesConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "groq".into()
}
fn default_model() -> String {
    "llama-3.3-70b-versatile".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1024
}

/// Redact a secret for Debug output.
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
            .field("backend", &self.backend)
            .field("dispatch", &self.dispatch)
            .field("sessions", &self.sessions)
            .field("policies", &self.policies)
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

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL; actions POST to `{api_url}/hackathon/<action>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Per-action timeout
    #[serde(default = "default_action_timeout")]
    pub timeout_secs: u64,
}

fn default_action_timeout() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            timeout_secs: default_action_timeout(),
        }
    }
}

/// When an escalating action result ends the turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPolicy {
    /// Return to the handler once so it can say goodbye.
    #[default]
    LetHandlerFinish,
    /// End the turn right after the batch holding the escalating result.
    HaltImmediately,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Handler invocations allowed per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default)]
    pub escalation_policy: EscalationPolicy,

    /// Previous user utterances given to the classifier
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Model for intent classification (defaults to `default_model`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_model: Option<String>,
}

fn default_max_iterations() -> usize {
    25
}
fn default_history_window() -> usize {
    5
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            escalation_policy: EscalationPolicy::default(),
            history_window: default_history_window(),
            classifier_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// "memory", "file", or "sqlite"
    #[serde(default = "default_session_backend")]
    pub backend: String,

    /// Directory (file) or database path (sqlite); defaults under the config dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_session_backend() -> String {
    "memory".into()
}

const SESSION_BACKENDS: &[&str] = &["memory", "file", "sqlite"];

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoliciesConfig {
    /// JSON rules file, re-read on every handler call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<String>,

    /// Inline rules, used when no file is configured
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    3000
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

impl AppConfig {
    /// Load configuration from the default path (~/.deskpilot/config.toml).
    ///
    /// Environment overrides:
    /// - `DESKPILOT_API_KEY`, then `GROQ_API_KEY`, then `OPENAI_API_KEY`
    /// - `DESKPILOT_PROVIDER`, `DESKPILOT_MODEL`
    /// - `API_URL` (commerce backend)
    /// - `DESKPILOT_RULES_FILE`
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
            self.api_key = lookup("DESKPILOT_API_KEY")
                .or_else(|| lookup("GROQ_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(provider) = lookup("DESKPILOT_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("DESKPILOT_MODEL") {
            self.default_model = model;
        }
        if let Some(url) = lookup("API_URL") {
            self.backend.api_url = Some(url);
        }
        if let Some(path) = lookup("DESKPILOT_RULES_FILE") {
            self.policies.rules_file = Some(path);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".deskpilot")
    }

    /// Where file/sqlite sessions live unless `sessions.path` says otherwise.
    pub fn sessions_path(&self) -> PathBuf {
        match &self.sessions.path {
            Some(p) => PathBuf::from(p),
            None if self.sessions.backend == "sqlite" => Self::config_dir().join("sessions.db"),
            None => Self::config_dir().join("sessions"),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.dispatch.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.max_iterations must be at least 1".into(),
            ));
        }

        if !SESSION_BACKENDS.contains(&self.sessions.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "sessions.backend must be one of {:?}, got '{}'",
                SESSION_BACKENDS, self.sessions.backend
            )));
        }

        Ok(())
    }

    /// The language-model key for the default provider, or a remediation error.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.providers
            .get(&self.default_provider)
            .and_then(|p| p.api_key.as_deref())
            .or(self.api_key.as_deref())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::MissingSetting {
                setting: "api_key".into(),
                hint: "Set DESKPILOT_API_KEY (or GROQ_API_KEY) or add api_key to ~/.deskpilot/config.toml".into(),
            })
    }

    /// The commerce backend base URL, or a remediation error.
    pub fn require_backend_url(&self) -> Result<&str, ConfigError> {
        self.backend
            .api_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ConfigError::MissingSetting {
                setting: "backend.api_url".into(),
                hint: "Set API_URL or add [backend] api_url to ~/.deskpilot/config.toml".into(),
            })
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.require_api_key().is_ok()
    }

    /// Generate a default config TOML string (for `init`).
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
            backend: BackendConfig::default(),
            dispatch: DispatchConfig::default(),
            sessions: SessionsConfig::default(),
            policies: PoliciesConfig::default(),
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

    #[error("Missing setting: {setting}")]
    MissingSetting { setting: String, hint: String },
}

impl ConfigError {
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::MissingSetting { hint, .. } => Some(hint),
            _ => None,
        }
    }
}

impl From<ConfigError> for deskpilot_core::Error {
    fn from(e: ConfigError) -> Self {
        let hint = e.hint().map(str::to_string);
        deskpilot_core::Error::Config {
            message: e.to_string(),
            hint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_provider, "groq");
        assert_eq!(config.default_model, "llama-3.3-70b-versatile");
        assert_eq!(config.dispatch.max_iterations, 25);
        assert_eq!(config.dispatch.escalation_policy, EscalationPolicy::LetHandlerFinish);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.gateway.port, config.gateway.port);
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
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.dispatch.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_session_backend_rejected() {
        let mut config = AppConfig::default();
        config.sessions.backend = "redis".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("redis"));
    }

    #[test]
    fn escalation_policy_parses() {
        let config: AppConfig = toml::from_str(
            r#"
[dispatch]
escalation_policy = "halt_immediately"
max_iterations = 5
"#,
        )
        .unwrap();
        assert_eq!(config.dispatch.escalation_policy, EscalationPolicy::HaltImmediately);
        assert_eq!(config.dispatch.max_iterations, 5);
        assert_eq!(config.dispatch.history_window, 5);

        let bad: Result<AppConfig, _> = toml::from_str("[dispatch]\nescalation_policy = \"sometimes\"\n");
        assert!(bad.is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().default_provider, "groq");
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[
            ("GROQ_API_KEY", "gsk_test"),
            ("API_URL", "http://localhost:4000"),
            ("DESKPILOT_MODEL", "llama-3.1-8b-instant"),
        ]));
        assert_eq!(config.require_api_key().unwrap(), "gsk_test");
        assert_eq!(config.require_backend_url().unwrap(), "http://localhost:4000");
        assert_eq!(config.default_model, "llama-3.1-8b-instant");
    }

    #[test]
    fn explicit_key_beats_env() {
        let mut config = AppConfig {
            api_key: Some("from_file".into()),
            ..AppConfig::default()
        };
        config.apply_env(env(&[("DESKPILOT_API_KEY", "from_env")]));
        assert_eq!(config.api_key.as_deref(), Some("from_file"));
    }

    #[test]
    fn missing_key_names_setting_and_fix() {
        let config = AppConfig::default();
        let err = config.require_api_key().unwrap_err();
        assert!(err.to_string().contains("api_key"));
        assert!(err.hint().unwrap().contains("DESKPILOT_API_KEY"));

        let core: deskpilot_core::Error = err.into();
        assert_eq!(core.kind(), deskpilot_core::ErrorKind::Configuration);
        assert!(core.remediation().unwrap().contains("GROQ_API_KEY"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = AppConfig {
            api_key: Some("gsk_supersecret".into()),
            ..AppConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("supersecret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn sessions_path_defaults_by_backend() {
        let mut config = AppConfig::default();
        config.sessions.backend = "sqlite".into();
        assert!(config.sessions_path().ends_with("sessions.db"));
        config.sessions.path = Some("/var/lib/deskpilot".into());
        assert_eq!(config.sessions_path(), PathBuf::from("/var/lib/deskpilot"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("groq"));
        assert!(toml_str.contains("let_handler_finish"));
    }
}
