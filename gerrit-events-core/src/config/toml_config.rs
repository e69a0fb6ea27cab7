//! TOML configuration file I/O
//!
//! Handles loading and saving the stream configuration to/from TOML files
//! in the user's configuration directory.

use crate::config::{ConnectionConfig, DispatchConfig, WhitelistConfig};
use crate::error::{ConfigError, GerritError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Complete TOML configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Connection settings
    #[serde(rename = "gerrit")]
    pub connection: ConnectionConfig,

    /// Dispatcher settings (optional)
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Whitelist settings (optional)
    #[serde(default)]
    pub whitelist: WhitelistConfig,
}

impl TomlConfig {
    /// Create a new TOML configuration with default dispatch and whitelist settings
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            dispatch: DispatchConfig::default(),
            whitelist: WhitelistConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, GerritError> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GerritError::Config(ConfigError::LoadFailed {
                path: path.to_string_lossy().to_string(),
            }),
            _ => GerritError::Config(ConfigError::IoError {
                message: format!("Failed to read config file: {}", e),
            }),
        })?;

        let config: TomlConfig = toml::from_str(&contents).map_err(|e| {
            GerritError::Config(ConfigError::ValidationError {
                message: format!("Failed to parse config file: {}", e),
            })
        })?;

        config.validate()?;

        info!(
            name = %config.connection.name,
            host = %config.connection.host,
            port = config.connection.port,
            worker_threads = config.dispatch.worker_threads,
            whitelist = ?config.whitelist.location,
            "Loaded configuration"
        );
        debug!(
            watchdog_timeout_secs = config.connection.watchdog_timeout_secs,
            watchdog_windows = config.connection.watchdog_windows.len(),
            "Watchdog settings"
        );

        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        self.dispatch.validate()?;
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), GerritError> {
        self.validate()?;

        let contents = toml::to_string_pretty(self)?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GerritError::Config(ConfigError::IoError {
                    message: format!("Failed to create config directory: {}", e),
                })
            })?;
        }

        std::fs::write(path, contents).map_err(|e| {
            GerritError::Config(ConfigError::IoError {
                message: format!("Failed to write config file: {}", e),
            })
        })?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

/// Default configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Get the default configuration directory
///
/// Returns `$XDG_CONFIG_HOME/gerrit-events`, falling back to
/// `~/.config/gerrit-events`. `GERRIT_EVENTS_CONFIG_DIR` overrides both.
pub fn get_config_dir() -> Result<PathBuf, GerritError> {
    if let Ok(config_dir) = std::env::var("GERRIT_EVENTS_CONFIG_DIR") {
        return Ok(PathBuf::from(config_dir));
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join("gerrit-events"));
        }
    }

    let home = std::env::var("HOME").map_err(|_| {
        GerritError::Config(ConfigError::IoError {
            message: "HOME environment variable not set".to_string(),
        })
    })?;

    Ok(PathBuf::from(home).join(".config").join("gerrit-events"))
}

/// Get the default configuration file path
pub fn get_config_path() -> Result<PathBuf, GerritError> {
    let config_dir = get_config_dir()?;
    Ok(config_dir.join(CONFIG_FILE_NAME))
}

/// Load configuration from the default TOML file
pub fn load_config() -> Result<TomlConfig, GerritError> {
    let config_path = get_config_path()?;
    TomlConfig::from_file(&config_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut connection = ConnectionConfig::new("review", "review.example.com", "ci-bot");
        connection.watchdog_timeout_secs = 300;
        let mut original = TomlConfig::new(connection);
        original.dispatch.worker_threads = 5;
        original
            .dispatch
            .ignore_email
            .insert("review".to_string(), "@ci.example.com".to_string());

        original.to_file(&config_path).unwrap();
        let loaded = TomlConfig::from_file(&config_path).unwrap();

        assert_eq!(loaded.connection.host, "review.example.com");
        assert_eq!(loaded.connection.watchdog_timeout_secs, 300);
        assert_eq!(loaded.dispatch, original.dispatch);
        assert_eq!(loaded.whitelist, WhitelistConfig::default());
    }

    #[test]
    fn test_missing_file_is_load_failed() {
        let temp_dir = tempdir().unwrap();
        let result = TomlConfig::from_file(&temp_dir.path().join("absent.toml"));
        assert!(matches!(
            result,
            Err(GerritError::Config(ConfigError::LoadFailed { .. }))
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected_on_save() {
        let temp_dir = tempdir().unwrap();
        let config = TomlConfig::new(ConnectionConfig::new("review", "", "ci-bot"));
        assert!(config.to_file(&temp_dir.path().join("config.toml")).is_err());
    }
}
