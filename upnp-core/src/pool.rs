//! Worker thread pools.
//!
//! The SDK runs three independent pools (request processing, outbound sends,
//! mini-server accept/dispatch). Each pool executes submitted jobs
//! asynchronously on a bounded set of OS worker threads. Submission never
//! blocks: a full queue rejects with backpressure and a draining pool
//! rejects with shutting-down, so callers can never deadlock on their own
//! submission.
//!
//! Ordering: jobs of a higher priority class are drained first, and order
//! is FIFO within one class. Each job runs to completion on exactly one
//! worker; in-flight jobs are never killed mid-execution.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::config::PoolConfig;
use crate::error::{Result, UpnpError};

/// Priority classes for pool jobs.
///
/// Within one class, execution order is submission order; across classes,
/// higher drains first. No fairness guarantee is made across classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPriority {
    High,
    Medium,
    Low,
}

impl JobPriority {
    fn queue_index(self) -> usize {
        match self {
            JobPriority::High => 0,
            JobPriority::Medium => 1,
            JobPriority::Low => 2,
        }
    }
}

/// A unit of work: closure plus priority class. Executed exactly once,
/// never resubmitted automatically.
pub struct Job {
    func: Box<dyn FnOnce() + Send>,
    priority: JobPriority,
}

impl Job {
    /// Package a closure for submission.
    pub fn new(priority: JobPriority, func: impl FnOnce() + Send + 'static) -> Self {
        Self {
            func: Box::new(func),
            priority,
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

struct PoolState {
    /// One FIFO queue per priority class, highest first.
    queues: [VecDeque<Box<dyn FnOnce() + Send>>; 3],
    shutting_down: bool,
}

impl PoolState {
    fn queued(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    fn pop(&mut self) -> Option<Box<dyn FnOnce() + Send>> {
        self.queues.iter_mut().find_map(VecDeque::pop_front)
    }
}

struct PoolInner {
    name: String,
    queue_capacity: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// A bounded pool of worker threads draining a prioritized job queue.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawn a named pool.
    ///
    /// Worker threads are named `{name}-worker-{n}`. A failed thread spawn
    /// is fatal to SDK startup and reported as [`UpnpError::InitFailed`];
    /// any workers already spawned are shut down again before returning.
    pub fn new(name: impl Into<String>, config: &PoolConfig) -> Result<Self> {
        let name = name.into();
        let inner = Arc::new(PoolInner {
            name: name.clone(),
            queue_capacity: config.queue_capacity,
            state: Mutex::new(PoolState {
                queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                shutting_down: false,
            }),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(config.workers);
        for n in 0..config.workers {
            let worker_inner = Arc::clone(&inner);
            let spawned = std::thread::Builder::new()
                .name(format!("{name}-worker-{n}"))
                .spawn(move || worker_loop(worker_inner));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    let partial = Self {
                        inner,
                        workers: Mutex::new(workers),
                    };
                    partial.shutdown();
                    return Err(UpnpError::InitFailed(format!(
                        "failed to spawn worker for pool {name:?}: {e}"
                    )));
                }
            }
        }

        tracing::debug!(pool = %name, workers = config.workers, "thread pool started");
        Ok(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    /// Enqueue a job for asynchronous execution.
    ///
    /// Returns immediately: [`UpnpError::Backpressure`] when the queue is
    /// full, [`UpnpError::ShuttingDown`] once the pool is draining.
    pub fn submit(&self, job: Job) -> Result<()> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| UpnpError::LockPoisoned)?;

        if state.shutting_down {
            return Err(UpnpError::ShuttingDown {
                pool: self.inner.name.clone(),
            });
        }
        if state.queued() >= self.inner.queue_capacity {
            tracing::warn!(pool = %self.inner.name, "job rejected: queue full");
            return Err(UpnpError::Backpressure {
                pool: self.inner.name.clone(),
            });
        }

        state.queues[job.priority.queue_index()].push_back(job.func);
        drop(state);
        self.inner.available.notify_one();
        Ok(())
    }

    /// Number of jobs currently queued (not including running ones).
    pub fn queued_jobs(&self) -> usize {
        self.inner.state.lock().map(|s| s.queued()).unwrap_or(0)
    }

    /// The pool's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Drain and stop the pool.
    ///
    /// New submissions are rejected immediately; queued and running jobs
    /// finish, then the workers are joined. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.shutting_down = true;
        }
        self.inner.available.notify_all();

        let workers = {
            let mut guard = match self.workers.lock() {
                Ok(g) => g,
                Err(_) => return,
            };
            std::mem::take(&mut *guard)
        };
        for handle in workers {
            let _ = handle.join();
        }
        tracing::debug!(pool = %self.inner.name, "thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        let job = {
            let mut state = match inner.state.lock() {
                Ok(s) => s,
                Err(_) => return,
            };
            loop {
                if let Some(job) = state.pop() {
                    break Some(job);
                }
                if state.shutting_down {
                    break None;
                }
                state = match inner.available.wait(state) {
                    Ok(s) => s,
                    Err(_) => return,
                };
            }
        };

        match job {
            Some(func) => {
                // A panicking job must not take the worker down with it.
                if catch_unwind(AssertUnwindSafe(func)).is_err() {
                    tracing::error!(pool = %inner.name, "job panicked");
                }
            }
            None => return,
        }
    }
}
