use crate::config::PoolConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

/// A unit of work handed to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Reasons an executor refuses a task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    #[error("pool `{pool}` is shut down")]
    Shutdown { pool: String },
    #[error("pool `{pool}` is saturated ({capacity} tasks in flight)")]
    Saturated { pool: String, capacity: usize },
}

/// Errors building a [`WorkerPool`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to start pool runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// A scheduling capability: accepts tasks and runs them at some later point,
/// on some thread.
///
/// No ordering is promised between tasks. The owner of an executor controls
/// its lifecycle; code that merely submits to one never shuts it down.
pub trait Executor: Send + Sync {
    /// Name used in logs and rejection errors.
    fn name(&self) -> &str;

    /// Submit `task`. A rejected task is dropped without running.
    fn execute(&self, task: Task) -> Result<(), Rejected>;
}

/// Fixed-size worker pool backed by a dedicated tokio runtime.
///
/// Tasks run on the runtime's blocking threads, capped at `workers` and
/// named `{name}-worker`. When `queue_capacity` is set, at most that many
/// tasks may be queued or running at once.
pub struct WorkerPool {
    name: String,
    workers: usize,
    capacity: Option<usize>,
    in_flight: Arc<AtomicUsize>,
    runtime: RwLock<Option<Runtime>>,
}

impl WorkerPool {
    pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        if config.workers == 0 {
            return Err(PoolError::InvalidConfig(format!(
                "pool `{}` needs at least one worker",
                config.name
            )));
        }
        if config.queue_capacity == Some(0) {
            return Err(PoolError::InvalidConfig(format!(
                "pool `{}` has a zero queue capacity",
                config.name
            )));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.workers)
            .thread_name(format!("{}-worker", config.name))
            .enable_time()
            .build()?;

        info!(
            pool = %config.name,
            workers = config.workers,
            queue_capacity = ?config.queue_capacity,
            "Worker pool started"
        );

        Ok(Self {
            name: config.name.clone(),
            workers: config.workers,
            capacity: config.queue_capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            runtime: RwLock::new(Some(runtime)),
        })
    }

    /// Shorthand for an unbounded pool.
    pub fn with_workers(name: &str, workers: usize) -> Result<Self, PoolError> {
        Self::new(&PoolConfig {
            name: name.to_string(),
            workers,
            queue_capacity: None,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Tasks currently queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.runtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stop accepting tasks without waiting for those already submitted.
    pub fn shutdown(&self) {
        if let Some(runtime) = self.take_runtime() {
            runtime.shutdown_background();
            info!(pool = %self.name, "Worker pool shut down");
        }
    }

    /// Stop accepting tasks and wait up to `timeout` for running ones.
    ///
    /// Blocks the calling thread, so it must not be called from async code.
    pub fn shutdown_timeout(&self, timeout: Duration) {
        if let Some(runtime) = self.take_runtime() {
            runtime.shutdown_timeout(timeout);
            info!(pool = %self.name, "Worker pool shut down");
        }
    }

    fn take_runtime(&self) -> Option<Runtime> {
        self.runtime
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Reserve an in-flight slot, honouring the capacity bound.
    fn reserve(&self) -> Result<InFlight, Rejected> {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if let Some(capacity) = self.capacity {
                if current >= capacity {
                    return Err(Rejected::Saturated {
                        pool: self.name.clone(),
                        capacity,
                    });
                }
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(InFlight(Arc::clone(&self.in_flight))),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Executor for WorkerPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, task: Task) -> Result<(), Rejected> {
        let guard = self.runtime.read().unwrap_or_else(PoisonError::into_inner);
        let runtime = guard.as_ref().ok_or_else(|| Rejected::Shutdown {
            pool: self.name.clone(),
        })?;

        let slot = self.reserve()?;
        debug!(pool = %self.name, in_flight = self.in_flight(), "Task queued");

        // Detached: completion is observed through whatever the task itself signals.
        runtime.spawn_blocking(move || {
            let _slot = slot;
            task();
        });
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // shutdown_background never blocks, so dropping from async code is safe.
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("capacity", &self.capacity)
            .field("in_flight", &self.in_flight())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Releases an in-flight slot when the task finishes, panics, or is dropped unrun.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs every task immediately on the submitting thread.
///
/// Useful for deterministic tests. As a response pool it gives up the
/// guarantee that callbacks never run on request workers.
#[derive(Debug, Clone, Default)]
pub struct InlineExecutor {
    name: String,
}

impl InlineExecutor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Executor for InlineExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, task: Task) -> Result<(), Rejected> {
        task();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn bounded(name: &str, workers: usize, capacity: usize) -> WorkerPool {
        WorkerPool::new(&PoolConfig {
            name: name.to_string(),
            workers,
            queue_capacity: Some(capacity),
        })
        .unwrap()
    }

    #[test]
    fn test_tasks_run_on_named_workers() {
        let pool = WorkerPool::with_workers("alpha", 2).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }))
        .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("alpha-worker"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = WorkerPool::with_workers("empty", 0).unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let pool = WorkerPool::with_workers("closing", 1).unwrap();
        pool.shutdown();
        assert!(pool.is_shutdown());

        let err = pool.execute(Box::new(|| {})).unwrap_err();
        assert_eq!(
            err,
            Rejected::Shutdown {
                pool: "closing".to_string()
            }
        );
    }

    #[test]
    fn test_saturated_pool_rejects_and_recovers() {
        let pool = bounded("tight", 1, 1);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();

        pool.execute(Box::new(move || {
            release_rx.recv().ok();
            done_tx.send(()).unwrap();
        }))
        .unwrap();

        let err = pool.execute(Box::new(|| {})).unwrap_err();
        assert!(matches!(err, Rejected::Saturated { capacity: 1, .. }));

        release_tx.send(()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // The slot is released once the blocking closure has returned.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while pool.in_flight() > 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(pool.execute(Box::new(|| {})).is_ok());
    }

    #[test]
    fn test_inline_executor_runs_on_caller() {
        let exec = InlineExecutor::new("inline");
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        exec.execute(Box::new(move || tx.send(thread::current().id()).unwrap()))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), caller);
    }
}
