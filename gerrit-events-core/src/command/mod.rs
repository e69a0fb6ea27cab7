//! Remote gerrit commands
//!
//! Besides the event stream, the review server is driven with one-shot
//! commands over the same [`Transport`](crate::connection::Transport):
//! [`CommandRunner`] opens a fresh session per command, while
//! [`PersistedQueryRunner`] keeps one session around for repeated
//! `gerrit query` calls.

pub mod query;
pub mod runner;

pub use query::{parse_query_output, PersistedQueryRunner, QueryOptions, QUERY_COMMAND};
pub use runner::{quote_argument, CommandRunner, ReviewCommand};
