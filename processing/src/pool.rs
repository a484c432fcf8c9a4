use std::any::Any;
use std::collections::VecDeque;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use parking_lot::{Condvar, Mutex, MutexGuard};

use services::config;

use crate::TransformError;

/// A unit of work executed by the pool.
///
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Default number of workers kept alive while idle.
///
pub const CORE_POOL_SIZE: usize = 3;

/// Default upper bound of concurrently running workers.
///
pub const MAX_POOL_SIZE: usize = 20;

/// Default time a worker above the core size stays idle before it exits.
///
pub const KEEP_ALIVE_TIME: Duration = Duration::from_secs(60);

/// Sizing of a [`WorkerPool`].
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers kept alive while idle.
    ///
    pub core_pool_size: usize,

    /// Upper bound of workers. Submissions beyond it are rejected.
    ///
    pub max_pool_size: usize,

    /// Time a worker above `core_pool_size` stays idle before it exits.
    ///
    pub keep_alive: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_pool_size: CORE_POOL_SIZE,
            max_pool_size: MAX_POOL_SIZE,
            keep_alive: KEEP_ALIVE_TIME,
        }
    }
}

impl PoolConfig {
    /// Reads the pool sizing from `CORE_POOL_SIZE`, `MAX_POOL_SIZE` and `KEEP_ALIVE_SECS`.
    ///
    pub fn from_config() -> Self {
        Self {
            core_pool_size: config().get_parsed_or("CORE_POOL_SIZE", CORE_POOL_SIZE),
            max_pool_size: config().get_parsed_or("MAX_POOL_SIZE", MAX_POOL_SIZE),
            keep_alive: Duration::from_secs(config().get_parsed_or("KEEP_ALIVE_SECS", KEEP_ALIVE_TIME.as_secs())),
        }
    }

    /// Checks that the pool can run at least one worker and that the core size fits into the maximum.
    ///
    pub fn validate(&self) -> Result<(), TransformError> {
        if self.max_pool_size == 0 {
            return Err(TransformError::InvalidConfiguration("max pool size must be positive".to_string()));
        }
        if self.core_pool_size > self.max_pool_size {
            return Err(TransformError::InvalidConfiguration(format!(
                "core pool size {} exceeds max pool size {}",
                self.core_pool_size,
                self.max_pool_size,
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
struct PoolState {
    /// Number of live worker threads.
    workers: usize,
    /// Waiting workers that haven't been promised a task yet.
    idle: usize,
    /// Tasks promised to waiting workers. Never longer than the number of waiting workers.
    handoff: VecDeque<Task>,
    shutdown: bool,
    spawned: usize,
}

struct Shared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
    terminated: Condvar,
}

/// A bounded pool of worker threads with direct handoff.
///
/// Submitted tasks are never queued: a task is handed to a waiting worker, or a new worker is started for it as long as
/// the pool is below its maximum size. Otherwise the submission is rejected immediately.
///
/// Up to `core_pool_size` workers are started regardless of idle ones, and stay alive while idle. Workers above that
/// exit after being idle for `keep_alive`.
///
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Creates a pool without any workers.
    ///
    pub fn new(config: PoolConfig) -> Result<Self, TransformError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(PoolState::default()),
                available: Condvar::new(),
                terminated: Condvar::new(),
            }),
        })
    }

    /// Sizing of the pool.
    ///
    pub fn config(&self) -> PoolConfig {
        self.shared.config
    }

    /// Hands `task` to a worker.
    ///
    /// Never blocks waiting for a worker to become available.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If a worker took the task.
    /// * `Err(TransformError::Rejected)` - If all `max_pool_size` workers are busy. The task is dropped.
    /// * `Err(TransformError::InvalidState)` - If the pool was shut down. The task is dropped.
    ///
    pub fn submit(&self, task: Task) -> Result<(), TransformError> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(TransformError::InvalidState("worker pool is shut down".to_string()));
        }

        if state.workers < self.shared.config.core_pool_size {
            return self.spawn_worker(&mut state, task);
        }
        if state.idle > 0 {
            state.idle -= 1;
            state.handoff.push_back(task);
            self.shared.available.notify_one();
            return Ok(());
        }
        if state.workers < self.shared.config.max_pool_size {
            return self.spawn_worker(&mut state, task);
        }

        Err(TransformError::Rejected)
    }

    fn spawn_worker(&self, state: &mut MutexGuard<PoolState>, task: Task) -> Result<(), TransformError> {
        state.spawned += 1;
        let name = format!("transform-worker-{}", state.spawned);
        let shared = self.shared.clone();

        match thread::Builder::new().name(name.clone()).spawn(move || work(shared, task)) {
            Ok(_) => {
                state.workers += 1;
                debug!(" - started {} ({} workers)", name, state.workers);
                Ok(())
            }
            Err(err) => {
                error!("Unable to start {}: {}", name, err);
                Err(TransformError::Rejected)
            }
        }
    }

    /// Number of live workers.
    ///
    pub fn worker_count(&self) -> usize {
        self.shared.state.lock().workers
    }

    /// Number of workers waiting for a task.
    ///
    pub fn idle_count(&self) -> usize {
        self.shared.state.lock().idle
    }

    /// Whether `shutdown` was called.
    ///
    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Stops accepting tasks.
    ///
    /// Running tasks are completed, then all workers exit.
    ///
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if !state.shutdown {
            info!("> shutdown worker pool ({} workers)", state.workers);
            state.shutdown = true;
            self.shared.available.notify_all();
        }
    }

    /// Waits until all workers have exited after `shutdown`.
    ///
    /// Returns `false` if workers are still alive after `timeout`.
    ///
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.workers > 0 {
            if self.shared.terminated.wait_until(&mut state, deadline).timed_out() {
                return state.workers == 0;
            }
        }
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn work(shared: Arc<Shared>, first: Task) {
    let mut next = Some(first);
    while let Some(task) = next.take() {
        run(task);
        next = wait_for_task(&shared);
    }
}

fn run(task: Task) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!("Task panicked: {}", panic_message(panic.as_ref()));
    }
}

/// Waits for a task to be handed over.
///
/// Returns `None` if the worker should exit, because the pool shut down or the worker exceeded its keep-alive time
/// while the pool was above its core size. The worker is no longer counted by then.
///
fn wait_for_task(shared: &Shared) -> Option<Task> {
    let mut state = shared.state.lock();
    state.idle += 1;
    loop {
        // A queued task was already accounted for by the submitter
        if let Some(task) = state.handoff.pop_front() {
            return Some(task);
        }
        if state.shutdown {
            retire(shared, &mut state);
            return None;
        }

        let timed_out = shared.available.wait_for(&mut state, shared.config.keep_alive).timed_out();
        if timed_out && state.handoff.is_empty() && state.workers > shared.config.core_pool_size {
            debug!(" - {} idle for {:?}", thread::current().name().unwrap_or("worker"), shared.config.keep_alive);
            retire(shared, &mut state);
            return None;
        }
    }
}

fn retire(shared: &Shared, state: &mut MutexGuard<PoolState>) {
    state.idle -= 1;
    state.workers -= 1;
    debug!(" - {} exits ({} workers left)", thread::current().name().unwrap_or("worker"), state.workers);
    if state.workers == 0 {
        shared.terminated.notify_all();
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use pretty_assertions::assert_eq;
    use test_utils::wait_until;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn pool(core: usize, max: usize, keep_alive: Duration) -> WorkerPool {
        WorkerPool::new(PoolConfig { core_pool_size: core, max_pool_size: max, keep_alive }).unwrap()
    }

    /// Submits a task that blocks until the returned sender is used or dropped.
    ///
    fn submit_blocking(pool: &WorkerPool) -> Result<mpsc::Sender<()>, TransformError> {
        let (release, released) = mpsc::channel::<()>();
        pool.submit(Box::new(move || {
            let _ = released.recv();
        }))?;
        Ok(release)
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            WorkerPool::new(PoolConfig { core_pool_size: 0, max_pool_size: 0, keep_alive: KEEP_ALIVE_TIME }),
            Err(TransformError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            WorkerPool::new(PoolConfig { core_pool_size: 4, max_pool_size: 2, keep_alive: KEEP_ALIVE_TIME }),
            Err(TransformError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.core_pool_size, 3);
        assert_eq!(config.max_pool_size, 20);
        assert_eq!(config.keep_alive, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_runs_tasks() {
        let pool = pool(2, 4, KEEP_ALIVE_TIME);
        let (done, finished) = mpsc::channel();

        for i in 0..3 {
            let done = done.clone();
            pool.submit(Box::new(move || done.send(i).unwrap())).unwrap();
            // Wait for each task so the next submission finds an idle worker
            assert!(wait_until(TIMEOUT, || pool.idle_count() > 0));
        }

        let mut results: Vec<i32> = finished.iter().take(3).collect();
        results.sort();
        assert_eq!(results, vec![0, 1, 2]);
    }

    #[test]
    fn test_rejects_when_saturated() -> anyhow::Result<()> {
        let pool = pool(1, 2, KEEP_ALIVE_TIME);

        let first = submit_blocking(&pool)?;
        let second = submit_blocking(&pool)?;
        assert_eq!(pool.worker_count(), 2);

        assert!(matches!(submit_blocking(&pool), Err(TransformError::Rejected)));
        assert!(matches!(submit_blocking(&pool), Err(TransformError::Rejected)));

        drop(first);
        assert!(wait_until(TIMEOUT, || pool.idle_count() == 1));
        let third = submit_blocking(&pool)?;
        assert_eq!(pool.worker_count(), 2);
        assert!(matches!(submit_blocking(&pool), Err(TransformError::Rejected)));

        drop(second);
        drop(third);
        Ok(())
    }

    #[test]
    fn test_reuses_idle_worker() -> anyhow::Result<()> {
        let pool = pool(1, 1, KEEP_ALIVE_TIME);

        drop(submit_blocking(&pool)?);
        assert!(wait_until(TIMEOUT, || pool.idle_count() == 1));

        let release = submit_blocking(&pool)?;
        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.idle_count(), 0);
        drop(release);
        Ok(())
    }

    #[test]
    fn test_workers_above_core_expire() -> anyhow::Result<()> {
        let pool = pool(1, 3, Duration::from_millis(50));

        let releases = vec![submit_blocking(&pool)?, submit_blocking(&pool)?, submit_blocking(&pool)?];
        assert_eq!(pool.worker_count(), 3);
        drop(releases);

        assert!(wait_until(TIMEOUT, || pool.worker_count() == 1));
        // The core worker stays
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.idle_count(), 1);
        Ok(())
    }

    #[test]
    fn test_panicking_task_keeps_worker() -> anyhow::Result<()> {
        let pool = pool(1, 1, KEEP_ALIVE_TIME);

        pool.submit(Box::new(|| panic!("boom")))?;
        assert!(wait_until(TIMEOUT, || pool.idle_count() == 1));

        let (done, finished) = mpsc::channel();
        pool.submit(Box::new(move || done.send(()).unwrap()))?;
        assert!(finished.recv_timeout(TIMEOUT).is_ok());
        assert_eq!(pool.worker_count(), 1);
        Ok(())
    }

    #[test]
    fn test_shutdown_completes_running_tasks() -> anyhow::Result<()> {
        let pool = pool(2, 2, KEEP_ALIVE_TIME);
        let completed = Arc::new(AtomicUsize::new(0));

        let release = {
            let completed = completed.clone();
            let (release, released) = mpsc::channel::<()>();
            pool.submit(Box::new(move || {
                let _ = released.recv();
                completed.fetch_add(1, Ordering::SeqCst);
            }))?;
            release
        };

        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(matches!(submit_blocking(&pool), Err(TransformError::InvalidState(_))));
        assert!(!pool.await_termination(Duration::from_millis(50)));

        drop(release);
        assert!(pool.await_termination(TIMEOUT));
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.worker_count(), 0);
        Ok(())
    }

    #[test]
    fn test_await_termination_without_workers() {
        let pool = pool(1, 1, KEEP_ALIVE_TIME);
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_millis(10)));
    }

    #[test]
    fn test_panic_message() {
        let panic = panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "static message");

        let panic = panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "formatted 42");
    }
}
