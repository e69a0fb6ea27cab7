//! Configuration module
//!
//! Connection, dispatch and whitelist settings, loaded from TOML files by
//! [`toml_config`]. Secrets are never read from or written to the file.

use crate::connection::watchdog::WatchdogWindow;
use crate::error::ConfigError;
use crate::types::{Credential, KeyPassphrase};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub mod toml_config;

/// Default SSH port of the review server
pub const DEFAULT_GERRIT_SSH_PORT: u16 = 29418;
/// Default size of the receive buffer, in bytes
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 16384;
/// Default number of dispatch workers
pub const DEFAULT_WORKER_THREADS: usize = 3;
/// Default idle time before a dispatch worker retires
pub const DEFAULT_WORKER_KEEP_ALIVE_SECS: u64 = 1200;
/// Lower bound for the worker keep-alive time
pub const MIN_WORKER_KEEP_ALIVE_SECS: u64 = 10;
/// Queue depth at which a saturation warning is logged
pub const DEFAULT_QUEUE_WARNING_THRESHOLD: usize = 40;
/// Grace period for each of the two dispatcher shutdown phases
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
/// Default whitelist reload interval
pub const DEFAULT_WHITELIST_REFRESH_MINUTES: u64 = 30;

fn default_name() -> String {
    "defaultServer".to_string()
}
fn default_port() -> u16 {
    DEFAULT_GERRIT_SSH_PORT
}
fn default_receive_buffer_size() -> usize {
    DEFAULT_RECEIVE_BUFFER_SIZE
}
fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}
fn default_keep_alive_secs() -> u64 {
    DEFAULT_WORKER_KEEP_ALIVE_SECS
}
fn default_queue_warning_threshold() -> usize {
    DEFAULT_QUEUE_WARNING_THRESHOLD
}
fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}
fn default_refresh_minutes() -> u64 {
    DEFAULT_WHITELIST_REFRESH_MINUTES
}

/// Settings for one stream-events connection
///
/// Immutable per connection attempt; the credential part may be replaced by
/// a [`crate::connection::CredentialUpdater`] before each attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Name of the server, reported in every event's provider
    #[serde(default = "default_name")]
    pub name: String,

    /// Review server hostname or IP address
    pub host: String,

    /// SSH port (default: 29418)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional proxy, `socks5://host:port` or `http://host:port`
    #[serde(default)]
    pub proxy: Option<String>,

    /// Front-end URL of the review server
    #[serde(default)]
    pub frontend_url: String,

    /// Account used for the session
    pub username: String,

    /// Private key file used for authentication
    #[serde(default)]
    pub private_key_file: Option<PathBuf>,

    /// Key passphrase; supplied programmatically, never stored in the file
    #[serde(skip)]
    pub passphrase: Option<KeyPassphrase>,

    /// Transport-level keep-alive interval in seconds, 0 uses the 30 second default
    #[serde(default)]
    pub keepalive_interval_secs: u64,

    /// Size of the receive buffer feeding the line decoder
    #[serde(default = "default_receive_buffer_size")]
    pub receive_buffer_size: usize,

    /// Seconds of silence before the watchdog forces a reconnect, 0 disables it
    #[serde(default)]
    pub watchdog_timeout_secs: u64,

    /// Time windows in which silence is expected
    #[serde(default)]
    pub watchdog_windows: Vec<WatchdogWindow>,
}

impl ConnectionConfig {
    /// Create a configuration with default values for everything but the target
    pub fn new(name: impl Into<String>, host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: DEFAULT_GERRIT_SSH_PORT,
            proxy: None,
            frontend_url: String::new(),
            username: username.into(),
            private_key_file: None,
            passphrase: None,
            keepalive_interval_secs: 0,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            watchdog_timeout_secs: 0,
            watchdog_windows: Vec::new(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::MissingField {
                field: "host".to_string(),
            });
        }

        if self.username.is_empty() {
            return Err(ConfigError::MissingField {
                field: "username".to_string(),
            });
        }

        if self.port == 0 {
            return Err(ConfigError::ValidationError {
                message: "Port cannot be zero".to_string(),
            });
        }

        if self.receive_buffer_size == 0 {
            return Err(ConfigError::ValidationError {
                message: "Receive buffer size cannot be zero".to_string(),
            });
        }

        if !self.watchdog_windows.is_empty() && self.watchdog_timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "Watchdog windows are set but the watchdog is disabled".to_string(),
            });
        }

        Ok(())
    }

    /// The credential part of the configuration
    pub fn credential(&self) -> Credential {
        Credential {
            username: self.username.clone(),
            private_key_file: self.private_key_file.clone(),
            passphrase: self.passphrase.clone(),
        }
    }

    /// Replace the credential part of the configuration
    pub fn set_credential(&mut self, credential: Credential) {
        self.username = credential.username;
        self.private_key_file = credential.private_key_file;
        self.passphrase = credential.passphrase;
    }

    /// Watchdog timeout, `None` when the watchdog is disabled
    pub fn watchdog_timeout(&self) -> Option<Duration> {
        (self.watchdog_timeout_secs > 0).then(|| Duration::from_secs(self.watchdog_timeout_secs))
    }

    /// Proxy as a display string for log context
    pub fn proxy_display(&self) -> &str {
        self.proxy.as_deref().unwrap_or("")
    }
}

/// Settings for the event dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound of concurrently running dispatch workers
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Idle seconds before a worker retires (minimum 10)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Queue depth at which a warning is logged, 0 disables the warning
    #[serde(default = "default_queue_warning_threshold")]
    pub queue_warning_threshold: usize,

    /// Grace period for each shutdown phase
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Per-server address suffix whose comments are not dispatched
    #[serde(default)]
    pub ignore_email: HashMap<String, String>,
}

impl DispatchConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::ValidationError {
                message: "Worker thread count cannot be zero".to_string(),
            });
        }
        Ok(())
    }

    /// Keep-alive time, clamped to the minimum
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(MIN_WORKER_KEEP_ALIVE_SECS))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_keep_alive_secs(mut self, keep_alive_secs: u64) -> Self {
        self.keep_alive_secs = keep_alive_secs;
        self
    }

    pub fn with_shutdown_grace_secs(mut self, shutdown_grace_secs: u64) -> Self {
        self.shutdown_grace_secs = shutdown_grace_secs;
        self
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            keep_alive_secs: DEFAULT_WORKER_KEEP_ALIVE_SECS,
            queue_warning_threshold: DEFAULT_QUEUE_WARNING_THRESHOLD,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            ignore_email: HashMap::new(),
        }
    }
}

/// Settings for the project whitelist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistConfig {
    /// Whitelist file; absent means no filtering
    #[serde(default)]
    pub location: Option<PathBuf>,

    /// Minutes between reloads of the file
    #[serde(default = "default_refresh_minutes")]
    pub refresh_minutes: u64,
}

impl WhitelistConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_minutes.max(1) * 60)
    }
}

impl Default for WhitelistConfig {
    fn default() -> Self {
        Self {
            location: None,
            refresh_minutes: DEFAULT_WHITELIST_REFRESH_MINUTES,
        }
    }
}
