//! Event dispatcher
//!
//! Queues work items on a [`WorkerPool`]. Each worker filters raw lines and
//! payloads against the whitelist, decodes them, and notifies the
//! [`ListenerRegistry`]. Posting never blocks and never fails; problems are
//! logged.

use super::listeners::{GerritEventListener, ListenerRegistry};
use super::pool::WorkerPool;
use super::whitelist::{start_whitelist_refresh, WhitelistHandle};
use super::work::{project_name_from_json, WorkItem};
use crate::config::{DispatchConfig, WhitelistConfig, MIN_WORKER_KEEP_ALIVE_SECS};
use crate::error::PoolError;
use crate::event::{EventDecoder, GerritEvent, JsonEventDecoder};
use crate::types::Provider;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Name prefix of dispatcher worker threads
pub const WORKER_THREAD_PREFIX: &str = "gerrit-event-worker-";

struct WorkContext {
    registry: Arc<ListenerRegistry>,
    whitelist: WhitelistHandle,
    decoder: Arc<dyn EventDecoder>,
}

impl WorkContext {
    fn admits(&self, json: &str) -> bool {
        let project = project_name_from_json(json);
        if self.whitelist.admits(project) {
            true
        } else {
            debug!(project, "Ignoring event from project outside the whitelist");
            false
        }
    }

    fn process(&self, item: WorkItem) {
        let event = match item {
            WorkItem::RawLine { text, provider } => {
                if text.is_empty() {
                    trace!("Skipping empty line");
                    return;
                }
                if !self.admits(&text) {
                    return;
                }
                match self.decoder.decode(&text, provider) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(line = %text, "Failed to decode event: {}", e);
                        return;
                    }
                }
            }
            WorkItem::DecodedPayload { payload, provider } => {
                if !self.admits(&payload.to_string()) {
                    return;
                }
                match self.decoder.decode_value(payload, provider) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Failed to decode event payload: {}", e);
                        return;
                    }
                }
            }
            WorkItem::InternalEvent { event } => event,
        };

        self.registry.notify(&event);
    }
}

/// Concurrent fan-out of stream events to listeners
pub struct EventDispatcher {
    pool: WorkerPool<WorkItem>,
    registry: Arc<ListenerRegistry>,
    whitelist: WhitelistHandle,
    queue_warning_threshold: usize,
    shutdown_grace: Duration,
    refresh_cancel: CancellationToken,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    /// Dispatcher with the JSON decoder and no whitelist filtering
    pub fn new(config: &DispatchConfig) -> Result<Self, PoolError> {
        Self::with_parts(config, WhitelistHandle::default(), Arc::new(JsonEventDecoder))
    }

    pub fn with_parts(
        config: &DispatchConfig,
        whitelist: WhitelistHandle,
        decoder: Arc<dyn EventDecoder>,
    ) -> Result<Self, PoolError> {
        let registry = Arc::new(ListenerRegistry::new());
        for (server, address) in &config.ignore_email {
            registry.set_ignore_email(server.clone(), address.clone());
        }

        let context = WorkContext {
            registry: Arc::clone(&registry),
            whitelist: whitelist.clone(),
            decoder,
        };
        let pool = WorkerPool::new(
            WORKER_THREAD_PREFIX,
            config.worker_threads,
            config.keep_alive(),
            move |item: WorkItem| context.process(item),
        )?;

        info!(
            workers = config.worker_threads,
            pool_size = pool.pool_size(),
            "Event dispatcher started"
        );

        Ok(Self {
            pool,
            registry,
            whitelist,
            queue_warning_threshold: config.queue_warning_threshold,
            shutdown_grace: config.shutdown_grace(),
            refresh_cancel: CancellationToken::new(),
            refresh_task: Mutex::new(None),
        })
    }

    /// Queue a work item
    pub fn post(&self, item: WorkItem) {
        trace!(kind = item.kind(), "Queueing work");
        if let Err(e) = self.pool.submit(item) {
            error!("Unable to queue a received event: {}", e);
        }
        self.check_queue_size();
    }

    /// Queue a line read from the stream
    pub fn post_line(&self, text: impl Into<String>, provider: Option<Arc<Provider>>) {
        self.post(WorkItem::raw_line(text, provider));
    }

    /// Queue an already parsed payload
    pub fn post_json(&self, payload: Value, provider: Option<Arc<Provider>>) {
        self.post(WorkItem::DecodedPayload { payload, provider });
    }

    /// Queue an event created in-process; it bypasses the whitelist
    pub fn post_event(&self, event: GerritEvent) {
        self.post(WorkItem::InternalEvent { event });
    }

    fn check_queue_size(&self) {
        let depth = self.pool.queue_len();
        if self.queue_warning_threshold > 0 && depth >= self.queue_warning_threshold {
            warn!(
                queue_depth = depth,
                pool_size = self.pool.pool_size(),
                "The incoming events queue is growing. Something might be stuck, \
                 or listeners are too slow; consider more worker threads"
            );
        }
    }

    /// Change the number of worker threads
    pub fn resize(&self, workers: usize) -> Result<(), PoolError> {
        self.pool.resize(workers)?;
        info!(
            workers = self.pool.core_size(),
            pool_size = self.pool.pool_size(),
            queue_depth = self.pool.queue_len(),
            active = self.pool.active_count(),
            "Event dispatcher resized"
        );
        Ok(())
    }

    /// Idle time before a worker retires, raised to the 10 s minimum
    pub fn set_keep_alive_secs(&self, secs: u64) {
        let secs = secs.max(MIN_WORKER_KEEP_ALIVE_SECS);
        self.pool.set_keep_alive(Duration::from_secs(secs));
    }

    pub fn keep_alive(&self) -> Duration {
        self.pool.keep_alive()
    }

    pub fn worker_count(&self) -> usize {
        self.pool.core_size()
    }

    pub fn queue_depth(&self) -> usize {
        self.pool.queue_len()
    }

    pub fn largest_pool_size(&self) -> usize {
        self.pool.largest_pool_size()
    }

    pub fn pool_size(&self) -> usize {
        self.pool.pool_size()
    }

    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }

    /// Copy of the queued work, oldest first
    pub fn work_queue_snapshot(&self) -> Vec<WorkItem> {
        self.pool.queued()
    }

    pub fn add_listener(&self, listener: Arc<dyn GerritEventListener>) -> bool {
        self.registry.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn GerritEventListener>) -> bool {
        self.registry.remove(listener)
    }

    pub fn remove_all_listeners(&self) -> Vec<Arc<dyn GerritEventListener>> {
        self.registry.remove_all()
    }

    pub fn set_ignore_email(&self, server: impl Into<String>, address: impl Into<String>) {
        self.registry.set_ignore_email(server, address);
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    pub fn whitelist(&self) -> &WhitelistHandle {
        &self.whitelist
    }

    /// Start reloading the whitelist as configured
    ///
    /// Must be called inside a tokio runtime. Replaces any running refresh.
    pub fn start_whitelist_refresh(&self, config: &WhitelistConfig) {
        let task = start_whitelist_refresh(&self.whitelist, config, self.refresh_cancel.child_token());
        if let Some(previous) = std::mem::replace(&mut *self.refresh_task.lock(), task) {
            previous.abort();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }

    /// Stop accepting work
    ///
    /// With `wait`, blocks until queued work is done: up to one grace period
    /// for the queue to drain, then the queue is discarded and running jobs
    /// get a second grace period.
    pub fn shutdown(&self, wait: bool) {
        self.refresh_cancel.cancel();
        self.pool.shutdown();
        if !wait {
            return;
        }

        if self.pool.await_termination(self.shutdown_grace) {
            debug!("Event dispatcher terminated");
            return;
        }

        let dropped = self.pool.shutdown_now();
        warn!(dropped = dropped.len(), "Discarded queued events after the grace period");
        if !self.pool.await_termination(self.shutdown_grace) {
            error!("Event dispatcher pool did not terminate");
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.refresh_cancel.cancel();
    }
}
