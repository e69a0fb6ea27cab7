//! Transport collaborator seams
//!
//! The connection manager never performs a handshake itself. It asks a
//! [`Transport`] for a [`Session`] and then runs commands on it.

use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::types::Credential;
use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Byte stream produced by a remote exec channel
pub type EventStream = Pin<Box<dyn AsyncRead + Send>>;

/// Opens authenticated sessions to the review server
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish and authenticate a session
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>, TransportError>;
}

/// An authenticated session
#[async_trait]
pub trait Session: Send + Sync {
    /// Run a command to completion and return its standard output
    async fn execute(&mut self, command: &str) -> Result<String, TransportError>;

    /// Start a long-running command and return its output stream
    async fn open_exec_channel(&mut self, command: &str) -> Result<EventStream, TransportError>;

    /// Whether the session is still usable
    fn is_connected(&self) -> bool;

    /// Close the session and every channel opened on it
    async fn disconnect(&mut self);
}

/// Hook for rotating credentials before a connect attempt
pub trait CredentialUpdater: Send + Sync {
    /// Return a replacement credential, or `None` to keep the current one
    fn refresh(&self, current: &Credential) -> Option<Credential>;
}
