//! One-shot command execution

use crate::config::ConnectionConfig;
use crate::connection::Transport;
use crate::error::TransportError;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Runs single commands, each on its own short-lived session
#[derive(Clone)]
pub struct CommandRunner {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
}

impl CommandRunner {
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Run `command` and return its output
    ///
    /// The session is closed again whether or not the command succeeded.
    pub async fn run(&self, command: &str) -> Result<String, TransportError> {
        let mut session = self.transport.connect(&self.config).await?;
        debug!(host = %self.config.host, command, "Sending command");
        let result = session.execute(command).await;
        session.disconnect().await;
        result
    }

    /// Run `command`, logging any failure; `true` on success
    pub async fn send_command(&self, command: &str) -> bool {
        match self.run(command).await {
            Ok(_) => true,
            Err(e) => {
                error!(host = %self.config.host, "Could not run command {}: {}", command, e);
                false
            }
        }
    }

    /// Run `command`, logging any failure; the output on success
    pub async fn send_command_str(&self, command: &str) -> Option<String> {
        match self.run(command).await {
            Ok(output) => Some(output),
            Err(e) => {
                error!(host = %self.config.host, "Could not run command {}: {}", command, e);
                None
            }
        }
    }
}

/// Quote `value` as one argument for the server's command line parser
pub fn quote_argument(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Builder for `gerrit review` commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewCommand {
    change: u64,
    patch_set: u64,
    message: Option<String>,
    labels: Vec<(String, i32)>,
    tag: Option<String>,
}

impl ReviewCommand {
    pub fn new(change: u64, patch_set: u64) -> Self {
        Self {
            change,
            patch_set,
            message: None,
            labels: Vec::new(),
            tag: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Vote `value` on `label`, e.g. `Verified` and `1`
    pub fn label(mut self, label: impl Into<String>, value: i32) -> Self {
        self.labels.push((label.into(), value));
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

impl fmt::Display for ReviewCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gerrit review {},{}", self.change, self.patch_set)?;
        if let Some(message) = &self.message {
            write!(f, " --message {}", quote_argument(message))?;
        }
        for (label, value) in &self.labels {
            write!(f, " --label {}={:+}", label, value)?;
        }
        if let Some(tag) = &self.tag {
            write!(f, " --tag {}", quote_argument(tag))?;
        }
        Ok(())
    }
}
