//! Stream connection manager
//!
//! [`GerritConnection`] keeps one `gerrit stream-events` session open:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected -> Connecting ...
//!        \             \             \
//!         +-------------+-------------+--> ShuttingDown (terminal)
//! ```
//!
//! Connect failures are retried every [`CONNECT_SLEEP`] until shutdown. Every
//! complete line read from the stream is posted to the [`EventDispatcher`]
//! together with the session's [`Provider`].

use super::line_decoder::LineDecoder;
use super::listener::{notify_connection_listeners, ConnectionEvent, ConnectionListener};
use super::state::{ConnectionState, SharedConnectionState};
use super::transport::{CredentialUpdater, Session, Transport};
use super::watchdog::Watchdog;
use crate::config::ConnectionConfig;
use crate::dispatch::EventDispatcher;
use crate::error::{ConnectionError, TransportError};
use crate::listener_set::ListenerSet;
use crate::types::Provider;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause between failed connect attempts
pub const CONNECT_SLEEP: Duration = Duration::from_secs(2);

/// Pause between reads of the event stream
pub const RX_SLEEP: Duration = Duration::from_millis(100);

/// Remote command producing the event stream
pub const STREAM_EVENTS_COMMAND: &str = "gerrit stream-events";

/// Remote command reporting the server version
pub const VERSION_COMMAND: &str = "gerrit version";

const VERSION_PREFIX: &str = "gerrit version ";

/// Strip the `gerrit version ` prefix from the version command output
pub fn format_version(output: &str) -> String {
    match output.split_once(VERSION_PREFIX) {
        Some((_, version)) => version.trim().to_string(),
        None => output.trim().to_string(),
    }
}

/// Why a streaming session ended
#[derive(Debug)]
enum SessionEnd {
    /// End of stream after `received` bytes
    Eof { received: u64 },
    Interrupted,
    Failed(String),
}

/// Handle to a managed stream-events connection
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct GerritConnection {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    config: Mutex<ConnectionConfig>,
    transport: Arc<dyn Transport>,
    dispatcher: RwLock<Option<Arc<EventDispatcher>>>,
    credential_updater: RwLock<Option<Arc<dyn CredentialUpdater>>>,
    state: SharedConnectionState,
    shutdown: CancellationToken,
    session_cancel: Mutex<Option<CancellationToken>>,
    reconnect_count: AtomicU64,
    version: RwLock<Option<String>>,
    listeners: ListenerSet<dyn ConnectionListener>,
    established: AtomicBool,
    watchdog: Mutex<Option<Watchdog>>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl GerritConnection {
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: config.name.clone(),
                config: Mutex::new(config),
                transport,
                dispatcher: RwLock::new(None),
                credential_updater: RwLock::new(None),
                state: SharedConnectionState::new(),
                shutdown: CancellationToken::new(),
                session_cancel: Mutex::new(None),
                reconnect_count: AtomicU64::new(0),
                version: RwLock::new(None),
                listeners: ListenerSet::new(),
                established: AtomicBool::new(false),
                watchdog: Mutex::new(None),
                task: Mutex::new(None),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Route received lines to `dispatcher`
    pub fn set_dispatcher(&self, dispatcher: Arc<EventDispatcher>) {
        *self.inner.dispatcher.write() = Some(dispatcher);
    }

    /// Consult `updater` for a fresh credential before every connect attempt
    pub fn set_credential_updater(&self, updater: Arc<dyn CredentialUpdater>) {
        *self.inner.credential_updater.write() = Some(updater);
    }

    /// Spawn the connection task on the current tokio runtime
    pub fn start(&self) -> Result<(), ConnectionError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ConnectionError::ShutDown {
                name: self.inner.name.clone(),
            });
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(ConnectionError::AlreadyStarted {
                name: self.inner.name.clone(),
            });
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.run().await });
        *self.inner.task.lock() = Some(task);
        Ok(())
    }

    /// Stop the connection for good
    ///
    /// With `join`, waits until the connection task has finished.
    pub async fn shutdown(&self, join: bool) {
        info!(server = %self.inner.name, "Shutting down connection");
        self.inner.state.start_shutting_down();
        self.inner.shutdown.cancel();
        self.inner.stop_watchdog();

        let task = self.inner.task.lock().take();
        if let (true, Some(task)) = (join, task) {
            if let Err(e) = task.await {
                error!(server = %self.inner.name, "Connection task failed: {}", e);
            }
        }
    }

    /// Drop the current session and connect again
    pub fn reconnect(&self) {
        self.inner.reconnect();
    }

    /// Number of reconnects requested so far, by callers or the watchdog
    pub fn reconnect_count(&self) -> u64 {
        self.inner.reconnect_count.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Server version reported by the last successful connect
    pub fn gerrit_version(&self) -> Option<String> {
        self.inner.version.read().clone()
    }

    /// Current configuration, including any refreshed credential
    pub fn config(&self) -> ConnectionConfig {
        self.inner.config.lock().clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) -> bool {
        let added = self.inner.listeners.add(listener);
        if !added {
            warn!(server = %self.inner.name, "The connection listener was added twice; ignoring");
        }
        added
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        self.inner.listeners.remove(listener)
    }

    pub fn remove_all_listeners(&self) -> Vec<Arc<dyn ConnectionListener>> {
        self.inner.listeners.remove_all()
    }
}

impl Inner {
    #[tracing::instrument(skip(self), fields(server = %self.name))]
    async fn run(self: Arc<Self>) {
        info!("Connection task started");
        let mut reusable: Option<Box<dyn Session>> = None;

        while !self.shutdown.is_cancelled() {
            let mut session = match reusable.take() {
                Some(session) if session.is_connected() => {
                    if !self.state.start_connecting() {
                        reusable = Some(session);
                        break;
                    }
                    session
                }
                stale => {
                    if let Some(mut session) = stale {
                        session.disconnect().await;
                    }
                    match self.connect().await {
                        Some(session) => session,
                        None => break,
                    }
                }
            };

            let cancel = self.shutdown.child_token();
            *self.session_cancel.lock() = Some(cancel.clone());
            self.start_watchdog();

            let end = self.stream(session.as_mut(), &cancel).await;

            self.stop_watchdog();
            self.session_cancel.lock().take();
            match &end {
                SessionEnd::Eof { received } => info!(received, "Event stream ended"),
                SessionEnd::Interrupted => info!("Event stream interrupted"),
                SessionEnd::Failed(reason) => warn!("Event stream failed: {}", reason),
            }

            let reuse = matches!(end, SessionEnd::Eof { .. }) && !cancel.is_cancelled() && session.is_connected();
            // A stream that closes before sending anything is retried like a failed connect
            let back_off = matches!(end, SessionEnd::Eof { received: 0 });
            if reuse {
                reusable = Some(session);
            } else {
                session.disconnect().await;
            }

            self.state.set_disconnected();
            let was_established = self.established.swap(false, Ordering::AcqRel);
            if was_established {
                notify_connection_listeners(&self.listeners, ConnectionEvent::Down, &self.name);
            }
            if back_off || !was_established {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(CONNECT_SLEEP) => {}
                }
            }
        }

        if let Some(mut session) = reusable {
            session.disconnect().await;
        }
        info!("Connection task stopped");
    }

    /// Connect until a session is open; `None` once shutdown is requested
    async fn connect(&self) -> Option<Box<dyn Session>> {
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }
            self.state.start_connecting();
            let config = self.refreshed_config();

            let attempt = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                attempt = self.open_session(&config) => attempt,
            };

            match attempt {
                Ok(session) => return Some(session),
                Err(e) => error!(
                    host = %config.host,
                    port = config.port,
                    proxy = config.proxy_display(),
                    user = %config.username,
                    key_file = %config.credential().key_file_display(),
                    "Could not connect: {}", e
                ),
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(CONNECT_SLEEP) => {}
            }
        }
    }

    async fn open_session(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>, TransportError> {
        let mut session = self.transport.connect(config).await?;
        match session.execute(VERSION_COMMAND).await {
            Ok(output) => {
                let version = format_version(&output);
                info!(host = %config.host, port = config.port, version = %version, "Connected");
                *self.version.write() = Some(version);
                Ok(session)
            }
            Err(e) => {
                session.disconnect().await;
                Err(e)
            }
        }
    }

    fn refreshed_config(&self) -> ConnectionConfig {
        let updater = self.credential_updater.read().clone();
        let mut config = self.config.lock();
        if let Some(updater) = updater {
            if let Some(credential) = updater.refresh(&config.credential()) {
                debug!(user = %credential.username, "Credential refreshed");
                config.set_credential(credential);
            }
        }
        config.clone()
    }

    fn provider(&self) -> Provider {
        let version = self.version.read().clone().unwrap_or_default();
        let config = self.config.lock();
        Provider::new(
            self.name.clone(),
            config.host.clone(),
            config.port,
            config.frontend_url.clone(),
            version,
        )
    }

    async fn stream(&self, session: &mut dyn Session, cancel: &CancellationToken) -> SessionEnd {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Interrupted,
            opened = session.open_exec_channel(STREAM_EVENTS_COMMAND) => opened,
        };
        let mut channel = match opened {
            Ok(channel) => channel,
            Err(e) => return SessionEnd::Failed(e.to_string()),
        };

        if !self.state.set_connected() {
            return SessionEnd::Interrupted;
        }
        self.established.store(true, Ordering::Release);
        notify_connection_listeners(&self.listeners, ConnectionEvent::Established, &self.name);

        let provider = Arc::new(self.provider());
        let buffer_size = self.config.lock().receive_buffer_size;
        let mut decoder = LineDecoder::with_capacity(buffer_size);
        let mut received = 0u64;

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Interrupted,
                read = decoder.read_from(&mut channel) => read,
            };
            match read {
                Ok(0) => return SessionEnd::Eof { received },
                Ok(n) => received += n as u64,
                Err(e) => return SessionEnd::Failed(e.to_string()),
            }

            self.post_lines(decoder.drain(), &provider);
            self.signal_watchdog();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Interrupted,
                _ = tokio::time::sleep(RX_SLEEP) => {}
            }
        }
    }

    fn post_lines(&self, lines: Vec<String>, provider: &Arc<Provider>) {
        if lines.is_empty() {
            return;
        }
        match self.dispatcher.read().as_ref() {
            Some(dispatcher) => {
                for line in lines {
                    dispatcher.post_line(line, Some(Arc::clone(provider)));
                }
            }
            None => debug!(lines = lines.len(), "No dispatcher set; dropping lines"),
        }
    }

    fn start_watchdog(self: &Arc<Self>) {
        let (timeout, windows) = {
            let config = self.config.lock();
            (config.watchdog_timeout(), config.watchdog_windows.clone())
        };
        let Some(timeout) = timeout else {
            return;
        };

        let owner = Arc::downgrade(self);
        let watchdog = Watchdog::start(timeout, windows, move || {
            if let Some(inner) = owner.upgrade() {
                debug!(server = %inner.name, "Watchdog forcing a reconnect");
                inner.reconnect();
            }
        });
        if let Some(previous) = self.watchdog.lock().replace(watchdog) {
            previous.shutdown();
        }
    }

    fn signal_watchdog(&self) {
        if let Some(watchdog) = self.watchdog.lock().as_ref() {
            watchdog.signal();
        }
    }

    fn stop_watchdog(&self) {
        if let Some(watchdog) = self.watchdog.lock().take() {
            watchdog.shutdown();
        }
    }

    fn reconnect(&self) {
        let count = self.reconnect_count.fetch_add(1, Ordering::AcqRel) + 1;
        info!(server = %self.name, reconnects = count, "Reconnect requested");
        self.stop_watchdog();
        if let Some(cancel) = self.session_cancel.lock().as_ref() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_version_strips_prefix() {
        assert_eq!(format_version("gerrit version 3.9.1\n"), "3.9.1");
        assert_eq!(format_version("  2.16.28-rc1  "), "2.16.28-rc1");
        assert_eq!(format_version(""), "");
    }
}
