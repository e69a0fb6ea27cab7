//! Connection state management
//!
//! Defines the state machine for the stream connection lifecycle and
//! provides lock-free state tracking readable from any thread.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Stream connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Not connected
    Disconnected = 0,

    /// Attempting to establish a session
    Connecting = 1,

    /// Session established and the event stream is open
    Connected = 2,

    /// Shutdown requested; terminal
    ShuttingDown = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::ShuttingDown,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::ShuttingDown => write!(f, "shutting down"),
        }
    }
}

/// Thread-safe connection state wrapper
///
/// Once `ShuttingDown` has been entered every further transition is ignored.
#[derive(Debug, Clone)]
pub struct SharedConnectionState(Arc<AtomicU8>);

impl SharedConnectionState {
    /// Create a new shared connection state
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConnectionState::default() as u8)))
    }

    /// Get the current connection state
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Set the connection state
    ///
    /// Returns `false` if the state is already terminal.
    pub fn set(&self, state: ConnectionState) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ConnectionState::ShuttingDown as u8).then_some(state as u8)
            })
            .is_ok()
    }

    /// Check if currently connected
    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    /// Check if currently connecting
    pub fn is_connecting(&self) -> bool {
        self.get() == ConnectionState::Connecting
    }

    /// Check if shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.get() == ConnectionState::ShuttingDown
    }

    /// Transition to connecting state
    pub fn start_connecting(&self) -> bool {
        self.set(ConnectionState::Connecting)
    }

    /// Transition to connected state
    pub fn set_connected(&self) -> bool {
        self.set(ConnectionState::Connected)
    }

    /// Transition to disconnected state
    pub fn set_disconnected(&self) -> bool {
        self.set(ConnectionState::Disconnected)
    }

    /// Enter the terminal shutting-down state
    pub fn start_shutting_down(&self) {
        self.0
            .store(ConnectionState::ShuttingDown as u8, Ordering::Release);
    }
}

impl Default for SharedConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
