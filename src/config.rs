//! Configuration parsing and structures

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::env::substitute_env_vars;
use crate::fs::FsOptions;
use crate::listing::Dialect;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub filesystem: FilesystemConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// How to reach the device
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// The adb executable, looked up on `PATH` when relative
    #[serde(default = "default_adb_path")]
    pub adb_path: PathBuf,

    /// Device serial; the only attached device when unset
    #[serde(default, deserialize_with = "empty_as_none")]
    pub serial: Option<String>,

    /// Deadline for every remote command
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
}

fn default_adb_path() -> PathBuf {
    PathBuf::from("adb")
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            serial: None,
            command_timeout: default_command_timeout(),
        }
    }
}

/// Directory cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Keep directory listings between operations
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// List the whole device tree once at startup
    #[serde(default)]
    pub preload: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preload: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemConfig {
    #[serde(default)]
    pub follow_symlinks: bool,

    #[serde(default = "default_max_link_hops")]
    pub max_link_hops: usize,

    #[serde(default)]
    pub dialect: Dialect,

    /// Directory for local copies of open files (OS temp dir when unset)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

fn default_max_link_hops() -> usize {
    32
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            max_link_hops: default_max_link_hops(),
            dialect: Dialect::default(),
            scratch_dir: None,
        }
    }
}

// `serial: ${ANDROID_SERIAL}` with the variable set to "" means "any device"
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string, substituting `${VAR}` references first
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Unknown log level '{}', expected one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        if self.device.adb_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "device.adb_path cannot be empty".to_string(),
            ));
        }

        if self.device.command_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "device.command_timeout must be greater than zero".to_string(),
            ));
        }

        if !(1..=255).contains(&self.filesystem.max_link_hops) {
            return Err(ConfigError::ValidationError(format!(
                "filesystem.max_link_hops must be between 1 and 255, got {}",
                self.filesystem.max_link_hops
            )));
        }

        if let Some(dir) = &self.filesystem.scratch_dir {
            if !dir.is_dir() {
                return Err(ConfigError::ValidationError(format!(
                    "filesystem.scratch_dir {:?} is not a directory",
                    dir
                )));
            }
        }

        Ok(())
    }

    /// Adapter options described by this configuration
    pub fn fs_options(&self) -> FsOptions {
        FsOptions {
            dircache: self.cache.enabled,
            dircache_all: self.cache.preload,
            follow_symlinks: self.filesystem.follow_symlinks,
            max_link_hops: self.filesystem.max_link_hops,
            dialect: self.filesystem.dialect,
            scratch_dir: self.filesystem.scratch_dir.clone(),
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::error::AdbFsError {
    fn from(err: ConfigError) -> Self {
        crate::error::AdbFsError::Config(err.to_string())
    }
}
