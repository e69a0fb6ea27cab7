//! Project whitelist
//!
//! A [`Whitelist`] is an immutable set of project names. The dispatcher
//! reads it through a [`WhitelistHandle`], which swaps whole snapshots
//! atomically so workers never lock. An empty whitelist admits everything.

use crate::config::WhitelistConfig;
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Immutable set of admitted project names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    projects: HashSet<String>,
}

impl Whitelist {
    pub fn new<I, S>(projects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            projects: projects.into_iter().map(Into::into).collect(),
        }
    }

    /// Read one project per line, stopping at the first empty line
    pub fn from_reader<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut projects = HashSet::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                break;
            }
            debug!(project = %line, "Whitelisting project");
            projects.insert(line);
        }
        Ok(Self { projects })
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Whether events of `project` may be dispatched
    pub fn admits(&self, project: &str) -> bool {
        self.projects.is_empty() || self.projects.contains(project)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

/// Shared, atomically replaceable whitelist snapshot
#[derive(Debug, Clone)]
pub struct WhitelistHandle {
    current: Arc<ArcSwap<Whitelist>>,
}

impl WhitelistHandle {
    pub fn new(initial: Whitelist) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<Whitelist> {
        self.current.load_full()
    }

    pub fn replace(&self, whitelist: Whitelist) {
        self.current.store(Arc::new(whitelist));
    }

    pub fn admits(&self, project: &str) -> bool {
        self.current.load().admits(project)
    }

    /// Reload from `path`; on failure the current snapshot is kept
    pub fn reload_from(&self, path: &Path) -> io::Result<usize> {
        let whitelist = Whitelist::from_file(path)?;
        let count = whitelist.len();
        self.replace(whitelist);
        Ok(count)
    }
}

impl Default for WhitelistHandle {
    fn default() -> Self {
        Self::new(Whitelist::default())
    }
}

/// Reload `handle` from `location` now and then every `interval`
///
/// The task ends when `cancel` fires.
pub fn spawn_whitelist_refresh(
    handle: WhitelistHandle,
    location: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    info!(
        location = %location.display(),
        interval_secs = interval.as_secs(),
        "Scheduling whitelist refresh"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match handle.reload_from(&location) {
                        Ok(count) => debug!(projects = count, "Whitelist reloaded"),
                        Err(e) => error!(
                            location = %location.display(),
                            "Failed to read whitelist file: {}", e
                        ),
                    }
                }
            }
        }
        debug!("Whitelist refresh stopped");
    })
}

/// Start the refresh task described by `config`, if a location is set
pub fn start_whitelist_refresh(
    handle: &WhitelistHandle,
    config: &WhitelistConfig,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    match &config.location {
        Some(location) => Some(spawn_whitelist_refresh(
            handle.clone(),
            location.clone(),
            config.refresh_interval(),
            cancel,
        )),
        None => {
            info!("No whitelist configured; events will not be filtered by project");
            None
        }
    }
}
