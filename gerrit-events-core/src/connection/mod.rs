//! Stream-events connection
//!
//! Everything needed to keep a session to the review server open and turn
//! its output into lines: the transport seam and its SSH implementation,
//! the line decoder, the stall watchdog, and the [`GerritConnection`]
//! manager tying them together.

pub mod line_decoder;
pub mod listener;
pub mod manager;
pub mod ssh;
pub mod state;
pub mod transport;
pub mod watchdog;

pub use line_decoder::LineDecoder;
pub use listener::{ConnectionEvent, ConnectionListener};
pub use manager::{
    format_version, GerritConnection, CONNECT_SLEEP, RX_SLEEP, STREAM_EVENTS_COMMAND,
    VERSION_COMMAND,
};
pub use ssh::{AskPass, ProxySpec, SshCommandSession, SshCommandTransport, ASKPASS_SECRET_ENV};
pub use state::{ConnectionState, SharedConnectionState};
pub use transport::{CredentialUpdater, EventStream, Session, Transport};
pub use watchdog::{is_exempt, Watchdog, WatchdogWindow};
