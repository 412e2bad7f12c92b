use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Application name used for config and data directories
pub const APP_NAME: &str = "scripthost";

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Config file not found")]
    NotFound,
    #[error("Could not determine a config directory for this platform")]
    NoConfigDir,
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("IO error reading config: {0}")]
    IoError(#[from] std::io::Error),
}

fn default_thread_prefix() -> String {
    "Script-".to_string()
}

fn default_poll_ms() -> u64 {
    100
}

fn default_join_timeout_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

/// Worker thread settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Prefix of each worker thread's name; the script's display name follows it
    #[serde(default = "default_thread_prefix")]
    pub thread_prefix: String,

    /// How often a paused worker checks whether it was resumed (milliseconds)
    #[serde(default = "default_poll_ms")]
    pub pause_poll_ms: u64,

    /// How often a worker on break checks whether the break is over (milliseconds)
    #[serde(default = "default_poll_ms")]
    pub break_poll_ms: u64,

    /// How long shutdown waits for worker threads to exit (milliseconds)
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            thread_prefix: default_thread_prefix(),
            pause_poll_ms: default_poll_ms(),
            break_poll_ms: default_poll_ms(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

impl ScriptingConfig {
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub fn break_poll(&self) -> Duration {
        Duration::from_millis(self.break_poll_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Random event catalog settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomsConfig {
    /// Master switch; when off every handler is loaded disabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Names of handlers to load disabled
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl Default for RandomsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disabled: Vec::new(),
        }
    }
}

impl RandomsConfig {
    /// Whether a handler with this name should start enabled
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled && !self.disabled.iter().any(|d| d == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to a file in the data directory
    #[serde(default)]
    pub file: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub scripting: ScriptingConfig,

    #[serde(default)]
    pub randoms: RandomsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HostConfig {
    pub fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", APP_NAME)
    }

    pub fn config_path() -> Result<PathBuf, ConfigLoadError> {
        Self::project_dirs()
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigLoadError::NoConfigDir)
    }

    /// Load from the platform config path
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound);
        }

        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from the platform config path, falling back to defaults if absent
    pub fn load_or_default() -> Result<Self, ConfigLoadError> {
        match Self::load() {
            Ok(config) => Ok(config),
            Err(ConfigLoadError::NotFound) | Err(ConfigLoadError::NoConfigDir) => {
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn save(&self) -> Result<PathBuf, ConfigLoadError> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigLoadError> {
        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}
