//! Configuration types and structures.

use crate::format::OutputFormat;
use crate::llm::{LlmConfig, ProviderKind};
use crate::types::LogLevel;
use crate::vault::DEFAULT_KEY_ENV;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default port for the HTTP API.
pub const DEFAULT_PORT: u16 = 31995;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub vault: VaultConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Server-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Default output format for CLI listings (json or markdown).
    #[serde(default)]
    pub default_format: OutputFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            host: default_host(),
            port: default_port(),
            default_format: OutputFormat::default(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("agentflow/agentflow.db")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Execution engine and planner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on steps in one continuous run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Pause between steps of a continuous run.
    #[serde(default = "default_iteration_delay_ms")]
    pub iteration_delay_ms: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Provider for new agents that do not name one.
    #[serde(default = "default_provider")]
    pub default_provider: ProviderKind,

    /// Model override applied to every provider when the agent has none.
    #[serde(default)]
    pub default_model: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            iteration_delay_ms: default_iteration_delay_ms(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            default_provider: default_provider(),
            default_model: None,
        }
    }
}

fn default_max_iterations() -> u32 {
    10
}

fn default_iteration_delay_ms() -> u64 {
    2_000
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

fn default_provider() -> ProviderKind {
    ProviderKind::OpenAi
}

impl EngineConfig {
    pub fn iteration_delay(&self) -> Duration {
        Duration::from_millis(self.iteration_delay_ms)
    }

    /// Request settings for an agent's provider and optional model override.
    pub fn llm_config(&self, kind: ProviderKind, agent_model: Option<&str>) -> LlmConfig {
        let model = agent_model
            .or(self.default_model.as_deref())
            .unwrap_or(kind.default_model())
            .to_string();
        LlmConfig {
            model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system_prompt: None,
        }
    }
}

/// Outbound chat notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Webhook receiving `{"text": ...}`. Unset disables notifications.
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_ms: default_webhook_timeout_ms(),
        }
    }
}

fn default_webhook_timeout_ms() -> u64 {
    5_000
}

impl NotificationsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// API key vault settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Name of the environment variable holding the master key.
    #[serde(default = "default_key_env")]
    pub key_env: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_env: default_key_env(),
        }
    }
}

fn default_key_env() -> String {
    DEFAULT_KEY_ENV.to_string()
}

/// Audit log persistence.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditConfig {
    /// Entries below this level are traced but not stored.
    #[serde(default)]
    pub min_level: LogLevel,
}

/// Per-vendor HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Base URL overrides keyed by provider name (`openai`, `anthropic`, ...).
    #[serde(default)]
    pub base_urls: HashMap<String, String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            base_urls: HashMap::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl ProvidersConfig {
    pub fn base_url(&self, kind: ProviderKind) -> Option<&str> {
        self.base_urls.get(kind.as_str()).map(String::as_str)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a single file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.server.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// `host:port` for the HTTP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.max_iterations, 10);
        assert_eq!(config.engine.iteration_delay_ms, 2000);
        assert_eq!(config.vault.key_env, "AGENTFLOW_ENCRYPTION_KEY");
        assert_eq!(config.audit.min_level, LogLevel::Info);
        assert!(config.notifications.webhook_url.is_none());
    }

    #[test]
    fn test_llm_config_model_precedence() {
        let mut engine = EngineConfig::default();
        assert_eq!(
            engine.llm_config(ProviderKind::Groq, None).model,
            ProviderKind::Groq.default_model()
        );

        engine.default_model = Some("house-model".into());
        assert_eq!(engine.llm_config(ProviderKind::Groq, None).model, "house-model");
        assert_eq!(
            engine.llm_config(ProviderKind::Groq, Some("agent-model")).model,
            "agent-model"
        );
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("engine:\n  max_iterations: 3\n").unwrap();
        assert_eq!(config.engine.max_iterations, 3);
        assert_eq!(config.engine.max_tokens, 1024);
        assert_eq!(config.server.port, DEFAULT_PORT);
    }
}
