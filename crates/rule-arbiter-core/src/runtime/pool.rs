// crates/rule-arbiter-core/src/runtime/pool.rs
// ============================================================================
// Module: Rule Arbiter Worker Pools
// Description: Fixed-size thread pools with a bounded job queue.
// Purpose: Apply backpressure to run and investigator submission.
// Dependencies: std::sync::mpsc, std::thread, thiserror, tracing
// ============================================================================

//! ## Overview
//! A [`WorkerPool`] owns a fixed number of threads draining one bounded
//! queue. When the queue is full, submission either blocks the caller or is
//! rejected, per [`FullQueuePolicy`]. A panicking job is contained and logged;
//! the worker keeps serving the queue.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::SyncSender;
use std::sync::mpsc::TrySendError;
use std::thread;
use std::thread::JoinHandle;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Behavior when the job queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullQueuePolicy {
    /// Block the submitter until a slot frees up.
    #[default]
    Block,
    /// Fail the submission immediately.
    Reject,
}

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Pool name used for thread names and errors.
    pub name: String,
    /// Number of worker threads.
    pub size: usize,
    /// Maximum queued jobs.
    pub queue_capacity: usize,
    /// Full-queue behavior.
    pub policy: FullQueuePolicy,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Worker pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The queue was full and the pool rejects overflow.
    #[error("worker pool {0} rejected the job: queue full")]
    Rejected(String),
    /// The pool is shutting down.
    #[error("worker pool {0} is shut down")]
    ShutDown(String),
    /// A worker thread could not be spawned.
    #[error("worker pool {pool} failed to spawn a worker: {message}")]
    Spawn {
        /// Pool name.
        pool: String,
        /// Spawn failure detail.
        message: String,
    },
    /// The pool configuration is unusable.
    #[error("worker pool {pool} is misconfigured: {message}")]
    Invalid {
        /// Pool name.
        pool: String,
        /// Validation failure detail.
        message: String,
    },
}

// ============================================================================
// SECTION: Worker Pool
// ============================================================================

/// Unit of work executed by a pool thread.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool with a bounded queue.
#[derive(Debug)]
pub struct WorkerPool {
    /// Pool name.
    name: String,
    /// Full-queue behavior.
    policy: FullQueuePolicy,
    /// Queue sender; `None` once shut down.
    sender: Mutex<Option<SyncSender<Job>>>,
    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns the pool's worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] when the configuration is invalid or a thread
    /// cannot be spawned.
    pub fn new(config: &WorkerPoolConfig) -> Result<Self, PoolError> {
        if config.size == 0 || config.queue_capacity == 0 {
            return Err(PoolError::Invalid {
                pool: config.name.clone(),
                message: "size and queue capacity must be positive".to_string(),
            });
        }
        let (sender, receiver) = mpsc::sync_channel::<Job>(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(config.size);
        for index in 0 .. config.size {
            let receiver = Arc::clone(&receiver);
            let pool = config.name.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", config.name))
                .spawn(move || worker_loop(&pool, &receiver))
                .map_err(|err| PoolError::Spawn {
                    pool: config.name.clone(),
                    message: err.to_string(),
                })?;
            workers.push(handle);
        }
        Ok(Self {
            name: config.name.clone(),
            policy: config.policy,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    /// Returns the pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues a job.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Rejected`] when the queue is full under the reject
    /// policy and [`PoolError::ShutDown`] when the pool no longer accepts work.
    pub fn execute<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .map_err(|_| PoolError::ShutDown(self.name.clone()))?
            .clone()
            .ok_or_else(|| PoolError::ShutDown(self.name.clone()))?;
        let job: Job = Box::new(job);
        match self.policy {
            FullQueuePolicy::Block => {
                sender.send(job).map_err(|_| PoolError::ShutDown(self.name.clone()))
            }
            FullQueuePolicy::Reject => sender.try_send(job).map_err(|err| match err {
                TrySendError::Full(_) => PoolError::Rejected(self.name.clone()),
                TrySendError::Disconnected(_) => PoolError::ShutDown(self.name.clone()),
            }),
        }
    }

    /// Stops accepting work, drains queued jobs, and joins the workers.
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!(pool = %self.name, "worker thread terminated abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs jobs until the queue disconnects.
fn worker_loop(pool: &str, receiver: &Mutex<Receiver<Job>>) {
    loop {
        let job = match receiver.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => return,
        };
        let Ok(job) = job else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(pool = %pool, "worker job panicked");
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
