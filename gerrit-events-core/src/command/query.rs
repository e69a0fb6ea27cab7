//! `gerrit query` over a persisted session

use crate::config::ConnectionConfig;
use crate::connection::{Session, Transport};
use crate::error::{DecodeError, GerritError, TransportError};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// Remote command answering change queries
pub const QUERY_COMMAND: &str = "gerrit query";

/// Extra data requested with a query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub patch_sets: bool,
    pub current_patch_set: bool,
    pub files: bool,
    pub comments: bool,
    pub commit_message: bool,
}

impl QueryOptions {
    /// Full command line for `query`
    pub fn command(&self, query: &str) -> String {
        let mut command = format!("{} --format=JSON", QUERY_COMMAND);
        let flags = [
            (self.patch_sets, " --patch-sets"),
            (self.current_patch_set, " --current-patch-set"),
            (self.files, " --files"),
            (self.comments, " --comments"),
            (self.commit_message, " --commit-message"),
        ];
        for (enabled, flag) in flags {
            if enabled {
                command.push_str(flag);
            }
        }
        command.push(' ');
        command.push_str(query);
        command
    }
}

/// Parse query output into one JSON object per change
///
/// The trailing statistics row is left out.
pub fn parse_query_output(output: &str) -> Result<Vec<Value>, DecodeError> {
    let mut changes = Vec::new();
    for line in output.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let value: Value = serde_json::from_str(line)?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }
        if value.get("type").and_then(Value::as_str) == Some("stats") {
            trace!(rows = ?value.get("rowCount"), "Query finished");
            continue;
        }
        changes.push(value);
    }
    Ok(changes)
}

/// Runs queries on one session, reconnecting only when it was lost
pub struct PersistedQueryRunner {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    session: Mutex<Option<Box<dyn Session>>>,
}

impl PersistedQueryRunner {
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            session: Mutex::new(None),
        }
    }

    /// Run `query` and return the matching changes
    pub async fn query(&self, query: &str, options: QueryOptions) -> Result<Vec<Value>, GerritError> {
        let output = self.execute(&options.command(query)).await?;
        Ok(parse_query_output(&output)?)
    }

    /// Run any command on the persisted session
    pub async fn execute(&self, command: &str) -> Result<String, TransportError> {
        let mut slot = self.session.lock().await;
        let session = match slot.take() {
            Some(session) if session.is_connected() => slot.insert(session),
            stale => {
                if let Some(mut session) = stale {
                    session.disconnect().await;
                }
                trace!(host = %self.config.host, "Persisted session is not valid; opening a new one");
                let fresh = self.transport.connect(&self.config).await?;
                slot.insert(fresh)
            }
        };
        session.execute(command).await
    }

    /// Whether a usable session is currently held
    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.is_connected())
            .unwrap_or(false)
    }

    /// Close the persisted session, if any
    pub async fn disconnect(&self) {
        if let Some(mut session) = self.session.lock().await.take() {
            session.disconnect().await;
            trace!(host = %self.config.host, "Persisted session disconnected");
        }
    }
}
