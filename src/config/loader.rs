//! Configuration loader with tier-based merging.

use super::merge::{deep_merge_all, read_yaml_value};
use super::types::Config;
use anyhow::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    /// Built-in defaults (lowest priority)
    Defaults = 0,
    /// Project-level config ($CWD/agentflow/)
    Project = 1,
    /// User-level config (~/.agentflow/)
    User = 2,
    /// Environment variables (highest priority)
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Directories for each configuration tier.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub project_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::discover()
    }
}

impl ConfigPaths {
    /// Discover configuration paths from environment and defaults.
    pub fn discover() -> Self {
        // User dir: AGENTFLOW_USER_DIR or ~/.agentflow
        let user_dir = std::env::var("AGENTFLOW_USER_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".agentflow")));

        // Project dir: AGENTFLOW_PROJECT_DIR or $CWD/agentflow
        let project_dir = std::env::var("AGENTFLOW_PROJECT_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from("agentflow")));

        Self {
            project_dir,
            user_dir,
        }
    }

    /// Create paths with explicit directories.
    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir,
        }
    }

    fn tier_file(&self, tier: ConfigTier) -> Option<PathBuf> {
        let dir = match tier {
            ConfigTier::Project => self.project_dir.as_ref(),
            ConfigTier::User => self.user_dir.as_ref(),
            _ => None,
        }?;
        Some(dir.join("config.yaml"))
    }
}

/// Configuration loader that handles tier-based merging.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub paths: ConfigPaths,
    config: Config,
    /// Files that contributed to the configuration, lowest tier first.
    sources: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Load configuration from all tiers with proper merging.
    pub fn load() -> Result<Self> {
        Self::load_with_paths(ConfigPaths::discover())
    }

    /// Load configuration with explicit paths and the process environment.
    pub fn load_with_paths(paths: ConfigPaths) -> Result<Self> {
        Self::load_with_env(paths, |key| std::env::var(key).ok())
    }

    /// Load configuration with explicit paths and an environment lookup.
    pub fn load_with_env<F>(paths: ConfigPaths, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Explicit config file replaces the file tiers
        if let Some(explicit_path) = env("AGENTFLOW_CONFIG_PATH") {
            let path = PathBuf::from(&explicit_path);
            let mut config = Config::load(&path)?;
            Self::apply_env_overrides(&mut config, &env);
            return Ok(Self {
                paths,
                config,
                sources: vec![path],
            });
        }

        let mut configs: Vec<Value> = vec![serde_json::to_value(Config::default())?];
        let mut sources = Vec::new();

        for tier in [ConfigTier::Project, ConfigTier::User] {
            let Some(file) = paths.tier_file(tier) else {
                continue;
            };
            if !file.exists() {
                continue;
            }
            match read_yaml_value(&file) {
                Ok(value) => {
                    debug!(tier = %tier, path = %file.display(), "Loaded config tier");
                    configs.push(value);
                    sources.push(file);
                }
                Err(e) => warn!(tier = %tier, path = %file.display(), error = %e, "Ignoring unreadable config"),
            }
        }

        let merged = deep_merge_all(configs);
        let mut config: Config = serde_json::from_value(merged)?;

        Self::apply_env_overrides(&mut config, &env);

        Ok(Self {
            paths,
            config,
            sources,
        })
    }

    /// Apply environment variable overrides to config.
    fn apply_env_overrides<F>(config: &mut Config, env: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = env("AGENTFLOW_DB_PATH") {
            config.server.db_path = PathBuf::from(db_path);
        }

        if let Some(port) = env("AGENTFLOW_PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => config.server.port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid AGENTFLOW_PORT"),
            }
        }

        if let Some(url) = env("AGENTFLOW_WEBHOOK_URL") {
            config.notifications.webhook_url = Some(url).filter(|u| !u.trim().is_empty());
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get mutable access to the configuration.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Config files that were merged, lowest tier first.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn project_dir(&self) -> Option<&Path> {
        self.paths.project_dir.as_deref()
    }

    pub fn user_dir(&self) -> Option<&Path> {
        self.paths.user_dir.as_deref()
    }
}
