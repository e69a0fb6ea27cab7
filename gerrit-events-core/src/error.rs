//! Error types for the gerrit-events library
//!
//! This module defines all error types used throughout the crate. Most of
//! them never leave the library: stream, decode, listener and pool errors
//! are logged where they happen and the event stream keeps running. Only
//! configuration problems and API misuse reach the embedding application.

use thiserror::Error;

/// Main error type for the gerrit-events library
#[derive(Error, Debug)]
pub enum GerritError {
    /// Errors related to configuration loading/parsing
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors raised by the transport collaborator
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Misuse of the connection manager API
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// A single stream line could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Errors related to the dispatch worker pool
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {path}")]
    LoadFailed { path: String },

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation error: {message}")]
    ValidationError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },
}

/// Errors produced while establishing or using a remote session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Could not connect to {host}:{port}: {reason}")]
    ConnectFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Authentication failed for user {username}")]
    AuthenticationFailed { username: String },

    #[error("Invalid proxy specification: {proxy}")]
    InvalidProxy { proxy: String },

    #[error("Remote command '{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Failed to open exec channel: {reason}")]
    ChannelFailed { reason: String },

    #[error("Session is not connected")]
    NotConnected,

    #[error("SSH client not available: {reason}")]
    ClientUnavailable { reason: String },
}

/// Connection manager API misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection to {name} has already been started")]
    AlreadyStarted { name: String },

    #[error("Connection to {name} has been shut down")]
    ShutDown { name: String },
}

/// Errors decoding a single line or payload into an event
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event has no type field")]
    MissingType,

    #[error("Event payload is not a JSON object")]
    NotAnObject,
}

/// Error returned by a listener that failed to handle an event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Listener failed: {message}")]
pub struct ListenerError {
    pub message: String,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Worker pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Work rejected: pool is shutting down")]
    Rejected,

    #[error("Invalid pool bounds: core size {core} exceeds maximum size {max}")]
    InvalidBounds { core: usize, max: usize },

    #[error("Failed to spawn worker thread: {reason}")]
    SpawnFailed { reason: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, GerritError>;
