//! Configuration file handling.
//!
//! Reads from `~/.config/keesync/keesync.toml`

use anyhow::{Context, Result};
use keesync_core::{SyncSettings, DEFAULT_JOBS_GROUP};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Database synced when `--database` is not given.
    #[serde(default)]
    pub default_database: Option<PathBuf>,
    /// Group holding the job records.
    #[serde(default = "default_jobs_group")]
    pub jobs_group: String,
    /// Standard icon that marks recycle bin groups.
    #[serde(default = "default_trash_icon")]
    pub trash_icon_id: usize,
    /// Environment variable read for the master password.
    #[serde(default = "default_password_env")]
    pub password_env: String,
}

fn default_jobs_group() -> String {
    DEFAULT_JOBS_GROUP.to_string()
}

fn default_trash_icon() -> usize {
    43
}

fn default_password_env() -> String {
    "KEESYNC_PASSWORD".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_database: None,
            jobs_group: default_jobs_group(),
            trash_icon_id: default_trash_icon(),
            password_env: default_password_env(),
        }
    }
}

impl Config {
    /// Load configuration from the config file.
    ///
    /// If `custom_path` is provided, load from that path.
    /// Otherwise, load from the default XDG config location.
    /// Creates a default config file if it doesn't exist (only for default path).
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self> {
        let is_custom = custom_path.is_some();
        let config_path = match custom_path {
            Some(path) => path,
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            if !is_custom {
                let config = Config::default();
                config.save_to(&config_path)?;
                tracing::info!("Created default config: {}", config_path.display());
                return Ok(config);
            } else {
                anyhow::bail!("Config file not found: {}", config_path.display());
            }
        }

        Self::read(&config_path)
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Save configuration to `path`, creating its directory.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Engine settings derived from this configuration.
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            jobs_group: self.jobs_group.clone(),
            trash_icon: self.trash_icon_id,
        }
    }

    /// Get the path to the config file.
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("keesync").join("keesync.toml"))
    }
}
