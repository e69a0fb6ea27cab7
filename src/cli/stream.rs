//! Event streaming command
//!
//! Wires configuration, transport, connection and dispatcher together and
//! prints every event as a JSON line until Ctrl-C.

use anyhow::Context;
use colored::Colorize;
use gerrit_events_core::error::{GerritError, ListenerError};
use gerrit_events_core::{
    ConnectionListener, EventDispatcher, GerritConnection, GerritEvent, GerritEventListener,
    SshCommandTransport,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Prints each event as one JSON line on stdout
struct JsonLinePrinter;

impl GerritEventListener for JsonLinePrinter {
    fn gerrit_event(&self, event: &GerritEvent) -> Result<(), ListenerError> {
        let line = serde_json::to_string(event).map_err(|e| ListenerError::new(e.to_string()))?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line).map_err(|e| ListenerError::new(e.to_string()))?;
        stdout.flush().map_err(|e| ListenerError::new(e.to_string()))
    }

    fn name(&self) -> &str {
        "json-line-printer"
    }
}

/// Reports connection changes on stderr
struct StatusPrinter {
    server: String,
}

impl ConnectionListener for StatusPrinter {
    fn connection_established(&self) {
        eprintln!("{} Streaming events from {}", "●".green(), self.server.bold());
    }

    fn connection_down(&self) {
        eprintln!("{} Lost connection to {}, reconnecting", "●".yellow(), self.server.bold());
    }
}

/// Run the stream command
pub fn run_stream(path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load(path).context("Could not load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Could not start the async runtime")?;

    runtime.block_on(async move {
        let transport = SshCommandTransport::new().map_err(GerritError::from)?;

        let dispatcher = Arc::new(
            EventDispatcher::new(&config.dispatch)
                .map_err(GerritError::from)
                .context("Could not start the event dispatcher")?,
        );
        dispatcher.start_whitelist_refresh(&config.whitelist);
        dispatcher.add_listener(Arc::new(JsonLinePrinter));

        let server = config.connection.name.clone();
        let connection = GerritConnection::new(config.connection, Arc::new(transport));
        connection.set_dispatcher(Arc::clone(&dispatcher));
        connection.add_listener(Arc::new(StatusPrinter {
            server: server.clone(),
        }));
        connection.start().map_err(GerritError::from)?;
        info!(server = %server, "Event stream started");

        tokio::signal::ctrl_c()
            .await
            .context("Could not listen for Ctrl-C")?;
        eprintln!("{} Shutting down", "●".dimmed());

        connection.shutdown(true).await;
        let reconnects = connection.reconnect_count();
        if let Err(e) = tokio::task::spawn_blocking(move || dispatcher.shutdown(true)).await {
            error!("Dispatcher shutdown failed: {}", e);
        }
        info!(server = %server, reconnects, "Event stream stopped");

        Ok::<(), anyhow::Error>(())
    })
}
