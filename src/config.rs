//! Configuration parsing and structures

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::env;
use crate::error::validate_remote_name;
use crate::platform::Platform;

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// How to invoke rclone
    #[serde(default)]
    pub rclone: RawRcloneConfig,

    /// Mount placement and timing
    #[serde(default)]
    pub mounts: RawMountsConfig,

    /// Remotes the daemon mounts at startup
    #[serde(default)]
    pub auto_mount: Vec<String>,
}

/// rclone invocation settings before resolution
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawRcloneConfig {
    /// Binary name or path (may reference `${VAR}`)
    pub binary: Option<String>,

    /// Value passed to `--vfs-cache-mode`
    pub vfs_cache_mode: Option<String>,

    /// Additional arguments appended to every `rclone mount`
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Mount settings before resolution
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawMountsConfig {
    /// Base directory for directory-style mounts (may reference `${VAR}` or `~`)
    pub base_dir: Option<String>,

    /// Grace period before a freshly spawned helper counts as mounted
    #[serde(default, with = "humantime_serde")]
    pub verify_delay: Option<Duration>,

    /// How often the daemon logs mount status
    #[serde(default, with = "humantime_serde")]
    pub status_interval: Option<Duration>,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Default rclone binary
pub const DEFAULT_BINARY: &str = "rclone";

/// Default `--vfs-cache-mode`
pub const DEFAULT_VFS_CACHE_MODE: &str = "writes";

/// Default verification delay for a freshly spawned mount helper
pub const DEFAULT_VERIFY_DELAY: Duration = Duration::from_secs(2);

/// Default interval between daemon status reports
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Settings consumed by the mount manager
    pub manager: ManagerSettings,

    /// How often the daemon logs mount status
    pub status_interval: Duration,

    /// Remotes mounted at startup
    pub auto_mount: Vec<String>,
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

/// Everything the mount manager needs, fixed for the session
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// rclone binary
    pub binary: String,

    /// `--vfs-cache-mode` value
    pub vfs_cache_mode: String,

    /// Extra arguments for `rclone mount`
    pub extra_args: Vec<String>,

    /// Parent of per-remote mount directories
    pub base_dir: PathBuf,

    /// Verification window after spawning a helper
    pub verify_delay: Duration,
}

impl ManagerSettings {
    /// Settings with defaults and the given base directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            vfs_cache_mode: DEFAULT_VFS_CACHE_MODE.to_string(),
            extra_args: Vec::new(),
            base_dir: base_dir.into(),
            verify_delay: DEFAULT_VERIFY_DELAY,
        }
    }
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config for the given platform
    pub fn resolve(self, platform: Platform) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            rclone,
            mounts,
            auto_mount,
        } = self;

        let binary = env::expand(rclone.binary.as_deref().unwrap_or(DEFAULT_BINARY))?;
        let base_dir = env::expand(
            mounts
                .base_dir
                .as_deref()
                .unwrap_or_else(|| platform.default_base_dir()),
        )?;

        Ok(Config {
            logging,
            manager: ManagerSettings {
                binary,
                vfs_cache_mode: rclone
                    .vfs_cache_mode
                    .unwrap_or_else(|| DEFAULT_VFS_CACHE_MODE.to_string()),
                extra_args: rclone.extra_args,
                base_dir: PathBuf::from(base_dir),
                verify_delay: mounts.verify_delay.unwrap_or(DEFAULT_VERIFY_DELAY),
            },
            status_interval: mounts.status_interval.unwrap_or(DEFAULT_STATUS_INTERVAL),
            auto_mount,
        })
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string for the current platform
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Self::from_str_for(content, Platform::current())
    }

    /// Parse configuration from a YAML string for a specific platform
    pub fn from_str_for(content: &str, platform: Platform) -> Result<Self, ConfigError> {
        let raw: RawConfig = if content.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?
        };
        raw.resolve(platform)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manager.binary.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "rclone.binary cannot be empty".to_string(),
            ));
        }

        if self.manager.vfs_cache_mode.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "rclone.vfs_cache_mode cannot be empty".to_string(),
            ));
        }

        if self.manager.verify_delay.is_zero() {
            return Err(ConfigError::ValidationError(
                "mounts.verify_delay must be greater than zero".to_string(),
            ));
        }

        if self.status_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "mounts.status_interval must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for remote in &self.auto_mount {
            validate_remote_name(remote)
                .map_err(|e| ConfigError::ValidationError(format!("auto_mount: {}", e)))?;
            if !seen.insert(remote) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate auto_mount remote: {:?}",
                    remote
                )));
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0:?}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
