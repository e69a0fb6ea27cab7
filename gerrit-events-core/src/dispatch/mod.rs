//! Event dispatch
//!
//! Work posted to the [`EventDispatcher`] is queued on a resizable pool of
//! worker threads, filtered against the project whitelist, decoded, and
//! delivered to every registered [`GerritEventListener`].

pub mod engine;
pub mod listeners;
pub mod pool;
pub mod whitelist;
pub mod work;

pub use engine::{EventDispatcher, WORKER_THREAD_PREFIX};
pub use listeners::{GerritEventListener, ListenerRegistry};
pub use pool::WorkerPool;
pub use whitelist::{spawn_whitelist_refresh, start_whitelist_refresh, Whitelist, WhitelistHandle};
pub use work::{project_name_from_json, WorkItem};
