// src/core/concurrent/executors.rs

//! Fixed-size worker pools backed by an unbounded FIFO work queue.
//!
//! Default thread names follow `pool-N-thread-M`, where `N` comes from a
//! process-wide pool counter. That counter is explicit process state: it must be
//! set up with [`initialize`] before the default factory is used and torn down
//! with [`shutdown`] when the library is unloaded.

use super::{AtomicBoolean, AtomicInteger, BlockingQueue};
use crate::core::errors::{CmsError, CmsResult};
use crate::core::metrics;
use parking_lot::{Mutex, RwLock};
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The process-wide counter used to number default-named pools.
static POOL_NUMBER: RwLock<Option<AtomicInteger>> = RwLock::new(None);

/// Sets up the process-wide pool counter. Calling it again keeps the current count.
pub fn initialize() {
    let mut pool_number = POOL_NUMBER.write();
    if pool_number.is_none() {
        *pool_number = Some(AtomicInteger::new(1));
        debug!("Executor pool counter initialized.");
    }
}

/// Tears down the process-wide pool counter.
pub fn shutdown() {
    if POOL_NUMBER.write().take().is_none() {
        warn!("Executor pool counter shut down without being initialized.");
    }
}

pub fn is_initialized() -> bool {
    POOL_NUMBER.read().is_some()
}

/// Creates threads on behalf of an executor.
pub trait ThreadFactory: Send + Sync {
    fn new_thread(&self, body: Task) -> io::Result<JoinHandle<()>>;
}

/// Names threads `pool-N-thread-M`.
#[derive(Debug)]
pub struct DefaultThreadFactory {
    thread_number: AtomicInteger,
    name_prefix: String,
}

impl DefaultThreadFactory {
    /// Takes the next pool number from the process-wide counter.
    ///
    /// # Errors
    ///
    /// Returns `NullPointer` if [`initialize`] has not been called.
    pub fn new() -> CmsResult<Self> {
        let guard = POOL_NUMBER.read();
        let pool_number = guard.as_ref().ok_or_else(|| {
            CmsError::NullPointer("executor pool counter is not initialized".to_string())
        })?;
        Ok(Self {
            thread_number: AtomicInteger::new(1),
            name_prefix: format!("pool-{}-thread-", pool_number.get_and_increment()),
        })
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }
}

impl ThreadFactory for DefaultThreadFactory {
    fn new_thread(&self, body: Task) -> io::Result<JoinHandle<()>> {
        let name = format!(
            "{}{}",
            self.name_prefix,
            self.thread_number.get_and_increment()
        );
        thread::Builder::new().name(name).spawn(body)
    }
}

pub fn default_thread_factory() -> CmsResult<DefaultThreadFactory> {
    DefaultThreadFactory::new()
}

/// Returns a pool of exactly `n_threads` workers using the default thread factory.
///
/// # Errors
///
/// `IllegalArgument` if `n_threads <= 0`, `NullPointer` if the pool counter is
/// not initialized, and `Generic` for any other construction failure.
pub fn new_fixed_thread_pool(n_threads: i32) -> CmsResult<ThreadPoolExecutor> {
    let size = validate_pool_size(n_threads)?;
    let factory = DefaultThreadFactory::new()?;
    ThreadPoolExecutor::new(size, &factory)
}

/// Returns a pool of exactly `n_threads` workers created by `factory`.
pub fn new_fixed_thread_pool_with_factory(
    n_threads: i32,
    factory: &dyn ThreadFactory,
) -> CmsResult<ThreadPoolExecutor> {
    let size = validate_pool_size(n_threads)?;
    ThreadPoolExecutor::new(size, factory)
}

fn validate_pool_size(n_threads: i32) -> CmsResult<usize> {
    if n_threads <= 0 {
        return Err(CmsError::IllegalArgument(format!(
            "pool size must be positive, got {n_threads}"
        )));
    }
    Ok(n_threads as usize)
}

/// The operations shared by every executor implementation.
pub trait ExecutorService: Send + Sync {
    /// Queues `task` for execution by the first free worker.
    fn execute(&self, task: Task) -> CmsResult<()>;

    /// Stops accepting new tasks; already queued tasks still run.
    fn shutdown(&self);

    /// Stops accepting new tasks and returns the ones that never started.
    fn shutdown_now(&self) -> Vec<Task>;

    fn is_shutdown(&self) -> bool;

    fn is_terminated(&self) -> bool;

    /// Blocks until every worker thread has exited.
    fn await_termination(&self);

    fn submit(&self, task: impl FnOnce() + Send + 'static) -> CmsResult<()>
    where
        Self: Sized,
    {
        self.execute(Box::new(task))
    }
}

#[derive(Default)]
struct PoolShared {
    queue: BlockingQueue<Task>,
    shutdown: AtomicBoolean,
    active: AtomicInteger,
    completed: AtomicInteger,
    live_workers: AtomicInteger,
}

/// An executor with a fixed number of workers draining one FIFO queue.
pub struct ThreadPoolExecutor {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pool_size: usize,
}

impl ThreadPoolExecutor {
    fn new(pool_size: usize, factory: &dyn ThreadFactory) -> CmsResult<Self> {
        let shared = Arc::new(PoolShared::default());
        let mut workers = Vec::with_capacity(pool_size);

        for _ in 0..pool_size {
            let worker_shared = shared.clone();
            shared.live_workers.increment_and_get();
            match factory.new_thread(Box::new(move || run_worker(worker_shared))) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shared.live_workers.decrement_and_get();
                    shared.shutdown.set(true);
                    shared.queue.wake_all();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(CmsError::Generic(format!(
                        "failed to start pool worker: {e}"
                    )));
                }
            }
        }

        debug!("Started fixed thread pool with {} workers.", pool_size);
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            pool_size,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// The number of workers currently running a task.
    pub fn active_count(&self) -> usize {
        self.shared.active.get().max(0) as usize
    }

    pub fn queued_task_count(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn completed_task_count(&self) -> usize {
        self.shared.completed.get().max(0) as usize
    }
}

impl ExecutorService for ThreadPoolExecutor {
    fn execute(&self, task: Task) -> CmsResult<()> {
        // Checked under the queue lock, where workers evaluate their exit condition.
        let shutdown = &self.shared.shutdown;
        self.shared
            .queue
            .push_unless(task, |_| shutdown.get())
            .map_err(|_| CmsError::InvalidState("executor has been shut down".to_string()))
    }

    fn shutdown(&self) {
        if !self.shared.shutdown.get_and_set(true) {
            debug!("Thread pool shutting down.");
        }
        self.shared.queue.wake_all();
    }

    fn shutdown_now(&self) -> Vec<Task> {
        self.shared.shutdown.set(true);
        let pending = self.shared.queue.drain();
        self.shared.queue.wake_all();
        debug!(
            "Thread pool stopped with {} tasks never started.",
            pending.len()
        );
        pending
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.get()
    }

    fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.shared.live_workers.get() == 0
    }

    fn await_termination(&self) {
        let current = thread::current().id();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            // A task that shuts its own pool down must not join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Thread pool worker terminated abnormally.");
            }
        }
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.shutdown();
        self.await_termination();
    }
}

fn run_worker(shared: Arc<PoolShared>) {
    while let Some(task) = shared
        .queue
        .take_or_exit(|queue| queue.is_empty() && shared.shutdown.get())
    {
        shared.active.increment_and_get();
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(
                "Task panicked on worker {:?}.",
                thread::current().name().unwrap_or("<unnamed>")
            );
        }
        shared.active.decrement_and_get();
        shared.completed.increment_and_get();
        metrics::EXECUTOR_TASKS_TOTAL.inc();
    }
    shared.live_workers.decrement_and_get();
}
