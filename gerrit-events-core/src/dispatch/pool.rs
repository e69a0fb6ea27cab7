//! Resizable worker thread pool
//!
//! Workers are OS threads so that listener callbacks may block freely. The
//! queue is unbounded and [`WorkerPool::submit`] never blocks.
//!
//! Sizing follows a core/maximum pair:
//! - a submit spawns a new worker while fewer than `core` workers exist, even
//!   if others are idle; otherwise the job is queued
//! - idle workers retire after the keep-alive time, core workers included
//! - workers above `max` exit the next time they look for work
//! - `core` may never exceed `max`

use crate::error::PoolError;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

type Handler<J> = dyn Fn(J) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    /// No new work accepted; the queue is still drained
    Shutdown,
    /// Queue cleared; workers exit after their current job
    Stop,
}

struct PoolState<J> {
    queue: VecDeque<J>,
    core: usize,
    max: usize,
    keep_alive: Duration,
    workers: usize,
    active: usize,
    largest: usize,
    next_id: usize,
    run_state: RunState,
}

struct Shared<J> {
    thread_prefix: String,
    state: Mutex<PoolState<J>>,
    work_available: Condvar,
    terminated: Condvar,
    handler: Box<Handler<J>>,
}

/// Pool of worker threads feeding jobs of type `J` to one handler
pub struct WorkerPool<J: Send + 'static> {
    shared: Arc<Shared<J>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Create a pool with `size` as both core and maximum size
    ///
    /// One worker is started right away.
    pub fn new<F>(
        thread_prefix: impl Into<String>,
        size: usize,
        keep_alive: Duration,
        handler: F,
    ) -> Result<Self, PoolError>
    where
        F: Fn(J) + Send + Sync + 'static,
    {
        let size = size.max(1);
        let pool = Self {
            shared: Arc::new(Shared {
                thread_prefix: thread_prefix.into(),
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    core: size,
                    max: size,
                    keep_alive,
                    workers: 0,
                    active: 0,
                    largest: 0,
                    next_id: 1,
                    run_state: RunState::Running,
                }),
                work_available: Condvar::new(),
                terminated: Condvar::new(),
                handler: Box::new(handler),
            }),
        };

        {
            let mut state = pool.shared.state.lock();
            Self::spawn_worker(&pool.shared, &mut state)?;
        }
        Ok(pool)
    }

    /// Queue a job; rejected once shutdown has started
    pub fn submit(&self, job: J) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock();
        if state.run_state != RunState::Running {
            return Err(PoolError::Rejected);
        }

        state.queue.push_back(job);
        if state.workers < state.core || state.workers == 0 {
            if let Err(e) = Self::spawn_worker(&self.shared, &mut state) {
                Self::spawn_failed_on_submit(&mut state, e)?;
                self.shared.work_available.notify_one();
            }
        } else {
            self.shared.work_available.notify_one();
        }
        Ok(())
    }

    /// The just queued job stays queued only if a running worker can take it
    fn spawn_failed_on_submit(state: &mut PoolState<J>, e: PoolError) -> Result<(), PoolError> {
        if state.workers > 0 {
            warn!(workers = state.workers, "Could not start an extra worker: {}", e);
            Ok(())
        } else {
            state.queue.pop_back();
            Err(e)
        }
    }

    /// Change the core size
    ///
    /// Growing starts as many new workers as there are queued jobs, up to
    /// the difference; shrinking lets excess workers retire when idle.
    pub fn set_core_size(&self, core: usize) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock();
        if core > state.max {
            return Err(PoolError::InvalidBounds {
                core,
                max: state.max,
            });
        }

        let previous = state.core;
        state.core = core;
        if core > previous && state.run_state == RunState::Running {
            let wanted = (core - previous).min(state.queue.len());
            for _ in 0..wanted {
                if state.workers >= state.core {
                    break;
                }
                Self::spawn_worker(&self.shared, &mut state)?;
            }
        } else if core < previous {
            self.shared.work_available.notify_all();
        }
        Ok(())
    }

    /// Change the maximum size; must not drop below the core size
    pub fn set_max_size(&self, max: usize) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock();
        if max == 0 || max < state.core {
            return Err(PoolError::InvalidBounds {
                core: state.core,
                max,
            });
        }

        state.max = max;
        if state.workers > max {
            self.shared.work_available.notify_all();
        }
        Ok(())
    }

    /// Resize to `size` workers, keeping `core <= max` at every step
    pub fn resize(&self, size: usize) -> Result<(), PoolError> {
        let size = size.max(1);
        let core = self.core_size();
        if core < size {
            self.set_max_size(size)?;
            self.set_core_size(size)?;
        } else if core > size {
            self.set_core_size(size)?;
            self.set_max_size(size)?;
        }
        Ok(())
    }

    pub fn set_keep_alive(&self, keep_alive: Duration) {
        let mut state = self.shared.state.lock();
        let shorter = keep_alive < state.keep_alive;
        state.keep_alive = keep_alive;
        if shorter {
            self.shared.work_available.notify_all();
        }
    }

    pub fn keep_alive(&self) -> Duration {
        self.shared.state.lock().keep_alive
    }

    pub fn core_size(&self) -> usize {
        self.shared.state.lock().core
    }

    pub fn max_size(&self) -> usize {
        self.shared.state.lock().max
    }

    /// Number of live worker threads
    pub fn pool_size(&self) -> usize {
        self.shared.state.lock().workers
    }

    /// Number of workers currently running a job
    pub fn active_count(&self) -> usize {
        self.shared.state.lock().active
    }

    /// Largest number of workers that have ever existed at the same time
    pub fn largest_pool_size(&self) -> usize {
        self.shared.state.lock().largest
    }

    /// Number of queued jobs not yet picked up by a worker
    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().run_state != RunState::Running
    }

    pub fn is_terminated(&self) -> bool {
        let state = self.shared.state.lock();
        state.run_state != RunState::Running && state.workers == 0
    }

    /// Stop accepting work; queued jobs still run
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.run_state == RunState::Running {
            state.run_state = RunState::Shutdown;
            debug!(queued = state.queue.len(), "Worker pool shutting down");
        }
        self.shared.work_available.notify_all();
    }

    /// Stop accepting work and discard the queue, returning the dropped jobs
    ///
    /// Jobs already running are left to finish.
    pub fn shutdown_now(&self) -> Vec<J> {
        let mut state = self.shared.state.lock();
        state.run_state = RunState::Stop;
        let dropped: Vec<J> = state.queue.drain(..).collect();
        self.shared.work_available.notify_all();
        dropped
    }

    /// Wait until every worker has exited; `false` on timeout
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.workers > 0 || state.run_state == RunState::Running {
            if self
                .shared
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.workers == 0 && state.run_state != RunState::Running;
            }
        }
        true
    }

    fn spawn_worker(shared: &Arc<Shared<J>>, state: &mut MutexGuard<'_, PoolState<J>>) -> Result<(), PoolError> {
        let name = format!("{}{}", shared.thread_prefix, state.next_id);
        let worker_shared = Arc::clone(shared);

        thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::work_loop(worker_shared))
            .map_err(|e| PoolError::SpawnFailed {
                reason: e.to_string(),
            })?;

        state.next_id += 1;
        state.workers += 1;
        state.largest = state.largest.max(state.workers);
        trace!(worker = %name, workers = state.workers, "Started worker");
        Ok(())
    }

    fn work_loop(shared: Arc<Shared<J>>) {
        let mut state = shared.state.lock();
        loop {
            if state.run_state == RunState::Stop {
                break;
            }
            if state.workers > state.max {
                break;
            }

            if let Some(job) = state.queue.pop_front() {
                state.active += 1;
                MutexGuard::unlocked(&mut state, || {
                    if catch_unwind(AssertUnwindSafe(|| (shared.handler)(job))).is_err() {
                        error!("Worker job panicked");
                    }
                });
                state.active -= 1;
                continue;
            }

            if state.run_state == RunState::Shutdown {
                break;
            }

            let keep_alive = state.keep_alive;
            let timed_out = shared
                .work_available
                .wait_for(&mut state, keep_alive)
                .timed_out();
            if timed_out && state.queue.is_empty() && state.run_state == RunState::Running {
                trace!("Idle worker retiring");
                break;
            }
        }

        state.workers -= 1;
        if state.workers == 0 {
            shared.terminated.notify_all();
        }
    }
}

impl<J: Send + Clone + 'static> WorkerPool<J> {
    /// Copy of the queued jobs, oldest first
    pub fn queued(&self) -> Vec<J> {
        self.shared.state.lock().queue.iter().cloned().collect()
    }
}

impl<J: Send + 'static> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn counting_pool(size: usize) -> (WorkerPool<usize>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let pool = WorkerPool::new("test-worker-", size, Duration::from_secs(60), move |n: usize| {
            seen.fetch_add(n, Ordering::SeqCst);
        })
        .unwrap();
        (pool, count)
    }

    fn state_with_workers(workers: usize) -> PoolState<usize> {
        PoolState {
            queue: VecDeque::from([7]),
            core: 3,
            max: 3,
            keep_alive: Duration::from_secs(60),
            workers,
            active: 0,
            largest: workers,
            next_id: workers + 1,
            run_state: RunState::Running,
        }
    }

    #[test]
    fn test_failed_spawn_keeps_job_for_running_workers() {
        let failure = || PoolError::SpawnFailed {
            reason: "out of threads".to_string(),
        };

        // A running worker picks the job up later, so the submit succeeds
        let mut state = state_with_workers(1);
        assert_eq!(WorkerPool::spawn_failed_on_submit(&mut state, failure()), Ok(()));
        assert_eq!(state.queue.len(), 1);

        // Without workers nothing would ever run it, so it is taken back
        let mut state = state_with_workers(0);
        assert_eq!(
            WorkerPool::spawn_failed_on_submit(&mut state, failure()),
            Err(failure())
        );
        assert!(state.queue.is_empty());
    }

    #[test]
    fn test_prestarts_one_worker() {
        let (pool, _) = counting_pool(3);
        assert_eq!(pool.pool_size(), 1);
        assert_eq!(pool.largest_pool_size(), 1);
    }

    #[test]
    fn test_runs_every_job() {
        let (pool, count) = counting_pool(2);
        for _ in 0..50 {
            pool.submit(1).unwrap();
        }
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let (pool, _) = counting_pool(1);
        pool.shutdown();
        assert_eq!(pool.submit(1), Err(PoolError::Rejected));
    }

    #[test]
    fn test_core_cannot_exceed_max() {
        let (pool, _) = counting_pool(2);
        assert_eq!(
            pool.set_core_size(3),
            Err(PoolError::InvalidBounds { core: 3, max: 2 })
        );
        assert_eq!(
            pool.set_max_size(1),
            Err(PoolError::InvalidBounds { core: 2, max: 1 })
        );

        pool.resize(4).unwrap();
        assert_eq!((pool.core_size(), pool.max_size()), (4, 4));
        pool.resize(1).unwrap();
        assert_eq!((pool.core_size(), pool.max_size()), (1, 1));
    }

    #[test]
    fn test_idle_workers_retire() {
        let (pool, _) = counting_pool(2);
        pool.set_keep_alive(Duration::from_millis(20));
        pool.submit(1).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.pool_size() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.pool_size(), 0);

        // A submit into an empty pool starts a fresh worker
        pool.set_keep_alive(Duration::from_secs(60));
        pool.submit(1).unwrap();
        assert_eq!(pool.pool_size(), 1);
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let pool = WorkerPool::new("test-worker-", 1, Duration::from_secs(60), move |n: usize| {
            if n == 0 {
                panic!("bad job");
            }
            let _ = tx.lock().send(n);
        })
        .unwrap();

        pool.submit(0).unwrap();
        pool.submit(7).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        assert_eq!(pool.pool_size(), 1);
    }

    #[test]
    fn test_shutdown_now_returns_queued_jobs() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let pool = WorkerPool::new("test-worker-", 1, Duration::from_secs(60), move |_: usize| {
            let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
        })
        .unwrap();

        for n in 0..4 {
            pool.submit(n).unwrap();
        }
        // Wait for the single worker to pick up the first job
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.active_count() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(pool.queued(), vec![1, 2, 3]);
        assert_eq!(pool.shutdown_now(), vec![1, 2, 3]);
        release_tx.send(()).unwrap();
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert!(pool.is_terminated());
    }
}
