//! Connection lifecycle notifications

use crate::listener_set::ListenerSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error};

/// Lifecycle events reported to [`ConnectionListener`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The event stream is open and lines are being read
    Established,

    /// A previously established stream ended
    Down,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Established => write!(f, "connection established"),
            ConnectionEvent::Down => write!(f, "connection down"),
        }
    }
}

/// Observer of the stream connection lifecycle
///
/// Callbacks run on the connection task and should return quickly.
pub trait ConnectionListener: Send + Sync {
    fn connection_established(&self) {}

    fn connection_down(&self) {}
}

/// Deliver `event` to every listener, containing panics per listener
pub(crate) fn notify_connection_listeners(
    listeners: &ListenerSet<dyn ConnectionListener>,
    event: ConnectionEvent,
    server: &str,
) {
    let snapshot = listeners.snapshot();
    debug!(server, %event, listeners = snapshot.len(), "Notifying connection listeners");

    for listener in snapshot.iter() {
        let delivered = catch_unwind(AssertUnwindSafe(|| match event {
            ConnectionEvent::Established => listener.connection_established(),
            ConnectionEvent::Down => listener.connection_down(),
        }));
        if delivered.is_err() {
            error!(server, %event, "Connection listener panicked");
        }
    }
}
