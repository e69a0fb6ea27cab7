//! Core library for the gerrit-events client
//!
//! This crate keeps a `gerrit stream-events` session open, splits the stream
//! into lines, and fans the decoded events out to in-process listeners on a
//! resizable pool of worker threads. One-shot commands such as
//! `gerrit review` and `gerrit query` run over the same transport.

pub mod error;
pub mod types;

pub mod command;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod event;
pub mod listener_set;

pub use command::{CommandRunner, PersistedQueryRunner, QueryOptions, ReviewCommand};
pub use config::{ConnectionConfig, DispatchConfig, WhitelistConfig};
pub use connection::{ConnectionListener, ConnectionState, GerritConnection, SshCommandTransport};
pub use dispatch::{EventDispatcher, GerritEventListener, Whitelist, WhitelistHandle, WorkItem};
pub use error::{GerritError, Result};
pub use event::{EventKind, GerritEvent};
pub use types::{Credential, Provider};

/// Initialize logging infrastructure
///
/// Logs go to the systemd journal when running under systemd and to stderr
/// otherwise. The level comes from `RUST_LOG`, defaulting to `info`.
pub fn init_logging() -> std::result::Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if std::env::var("JOURNAL_STREAM").is_ok() {
            let journal_layer = tracing_journald::layer()?;
            tracing_subscriber::registry()
                .with(journal_layer)
                .with(filter)
                .try_init()?;
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()?;

    Ok(())
}
