//! Worker pool implementation for parallel sampling.
//!
//! Provides a thread pool that manages worker lifecycle, task distribution,
//! and result collection for the loader's batch stream.
//!
//! # Key features
//! - Bounded channels prevent memory bloat
//! - Graceful shutdown on drop
//! - Workers pull from a single shared task queue

use crossbeam_channel::{bounded, Receiver, Sender};
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::error::{LoaderError, Result};

/// Thread pool for parallel sampling.
///
/// Manages worker lifecycle and communication through bounded channels:
/// - Task channel: Loader thread -> Workers (work distribution)
/// - Output channel: Workers -> Loader thread (result collection)
/// - Shutdown flag: Enables graceful termination
pub(crate) struct WorkerPool<Task, Output> {
    workers: Vec<thread::JoinHandle<()>>,
    task_tx: Option<Sender<Task>>,
    pub(crate) output_rx: Receiver<Output>,
    shutdown: Arc<AtomicBool>,
}

impl<Task, Output> WorkerPool<Task, Output>
where
    Task: Send + 'static,
    Output: Send + 'static,
{
    /// Spawns `num_workers` threads running `worker_fn(worker_id, tasks, outputs, shutdown)`.
    pub(crate) fn new<F>(
        num_workers: usize,
        task_capacity: usize,
        output_capacity: usize,
        worker_fn: F,
    ) -> Result<Self>
    where
        F: Fn(usize, Receiver<Task>, Sender<Output>, Arc<AtomicBool>) + Send + Sync + 'static,
    {
        if num_workers == 0 {
            return Err(LoaderError::WorkerPool(
                "cannot create a pool with 0 workers; sample inline instead".to_string(),
            ));
        }
        if task_capacity == 0 || output_capacity == 0 {
            return Err(LoaderError::WorkerPool(
                "pool channel capacities must be > 0 to prevent deadlocks".to_string(),
            ));
        }

        let (task_tx, task_rx) = bounded(task_capacity);
        let (output_tx, output_rx) = bounded(output_capacity);

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_fn = Arc::new(worker_fn);
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let task_rx = task_rx.clone();
            let output_tx = output_tx.clone();
            let shutdown_clone = shutdown.clone();
            let worker_fn_clone = worker_fn.clone();

            let handle = thread::Builder::new()
                .name(format!("sampling-worker-{}", worker_id))
                .spawn(move || {
                    worker_fn_clone(worker_id, task_rx, output_tx, shutdown_clone);
                })
                .map_err(|e| {
                    LoaderError::WorkerPool(format!(
                        "failed to spawn worker thread {}: {}",
                        worker_id, e
                    ))
                })?;

            workers.push(handle);
        }

        Ok(Self {
            workers,
            task_tx: Some(task_tx),
            output_rx,
            shutdown,
        })
    }

    /// Queues a task for whichever worker is free first.
    pub(crate) fn send(&self, task: Task) -> Result<()> {
        let tx = self
            .task_tx
            .as_ref()
            .ok_or(LoaderError::WorkerShutdown)?;
        tx.send(task)
            .map_err(|_| LoaderError::WorkerPool("all workers have exited".to_string()))
    }

    /// Stops handing out work: raises the shutdown flag and closes the task
    /// queue. Workers finish (or abandon) their current batch and exit.
    pub(crate) fn halt(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.task_tx.take();
    }
}

impl<Task, Output> Drop for WorkerPool<Task, Output> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.task_tx.take();

        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("sampling-worker").to_string();
            if worker.join().is_err() {
                warn!("{} panicked before shutdown", name);
            }
        }
    }
}
