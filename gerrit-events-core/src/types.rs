//! Type definitions and wrappers for secure data handling
//!
//! This module provides the credential wrapper used to authenticate against
//! the review server, and the [`Provider`] snapshot attached to every event
//! read during one session.

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Scheme reported in [`Provider::scheme`] for stream-events sessions
pub const GERRIT_PROTOCOL_SCHEME: &str = "ssh";

/// Wrapper for a private key passphrase
///
/// The passphrase is never printed by `Debug` and never logged.
#[derive(Clone, Debug)]
pub struct KeyPassphrase(Secret<String>);

impl KeyPassphrase {
    /// Create a new passphrase wrapper
    pub fn new(passphrase: String) -> Self {
        Self(Secret::new(passphrase))
    }

    /// Expose the passphrase value (use with caution!)
    ///
    /// This should only be called when handing the value to the transport.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<String> for KeyPassphrase {
    fn from(passphrase: String) -> Self {
        Self::new(passphrase)
    }
}

/// Credentials for the remote session
#[derive(Clone, Debug)]
pub struct Credential {
    /// Account name on the review server
    pub username: String,
    /// Private key file used for key-based authentication
    pub private_key_file: Option<PathBuf>,
    /// Optional passphrase protecting the key file
    pub passphrase: Option<KeyPassphrase>,
}

impl Credential {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            private_key_file: None,
            passphrase: None,
        }
    }

    pub fn with_private_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_file = Some(path.into());
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(KeyPassphrase::new(passphrase.into()));
        self
    }

    /// Key file as a printable string, for log context
    pub fn key_file_display(&self) -> String {
        self.private_key_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

/// Identifies which server session produced an event
///
/// Created once per successful connect and shared read-only by every work
/// item read during that session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// Configured name of the remote server
    pub name: String,
    /// Host the session is connected to
    pub host: String,
    /// Port the session is connected to
    pub port: u16,
    /// Transport scheme, always `ssh` for stream-events sessions
    pub scheme: String,
    /// Front-end URL of the review server
    pub url: String,
    /// Server version reported by `gerrit version`
    pub version: String,
}

impl Provider {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        url: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            scheme: GERRIT_PROTOCOL_SCHEME.to_string(),
            url: url.into(),
            version: version.into(),
        }
    }
}
