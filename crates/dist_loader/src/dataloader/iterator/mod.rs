//! src/dataloader/iterator/mod.rs
//!
//! Iterator implementations for DistLoader.
//!
//! - `BatchPlan`: splits the loader's inputs into numbered batches
//! - `BatchStream`: owns the worker pool (or the inline worker) and yields
//!   raw worker outputs, keeping `prefetch_factor` batches in flight per worker
//! - `LoaderIter`: the public iterator returned by `DistLoader::iter()`; it
//!   turns each worker output into a message through `read_message`
//!
//! # Stream Variants
//! - `Inline`: `num_workers = 0`; worker 0 samples on the loader thread
//! - `Pool`: `num_workers > 0`; a `WorkerPool` samples in parallel
//!
//! Dropping a stream joins its workers.

use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::workers::pool::WorkerPool;
use super::workers::{run_sampling_worker, sample_batch, Route, WorkerInit, WorkerOutput, WorkerTask};
use super::DistLoader;
use crate::context::DistContext;
use crate::error::{LoaderError, Result};
use crate::sampler::DistSampler;

/// Splits inputs into batches of `batch_size`.
pub(crate) struct BatchPlan<I> {
    inputs: Arc<[I]>,
    batch_size: usize,
    drop_last: bool,
    cursor: usize,
    batch_index: usize,
}

impl<I: Clone> BatchPlan<I> {
    pub(crate) fn new(inputs: Arc<[I]>, batch_size: usize, drop_last: bool) -> Self {
        Self {
            inputs,
            batch_size,
            drop_last,
            cursor: 0,
            batch_index: 0,
        }
    }
}

impl<I: Clone> Iterator for BatchPlan<I> {
    type Item = WorkerTask<I>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.cursor;
        if start >= self.inputs.len() {
            return None;
        }

        let end = (start + self.batch_size).min(self.inputs.len());
        if self.drop_last && end - start < self.batch_size {
            return None;
        }

        self.cursor = end;
        let task = WorkerTask {
            batch_index: self.batch_index,
            inputs: self.inputs[start..end].to_vec(),
        };
        self.batch_index += 1;
        Some(task)
    }
}

/// Shared configuration captured when a stream starts.
pub(crate) struct StreamConfig {
    pub(crate) prefetch_factor: usize,
    pub(crate) timeout: Option<Duration>,
    pub(crate) poll_interval: Duration,
}

pub(crate) enum BatchStream<S: DistSampler> {
    /// Worker 0 runs on the loader thread.
    /// - `shutdown`: set by `halt`; no batch starts afterwards
    Inline {
        init: WorkerInit<S>,
        ctx: DistContext,
        route: Route<S::Message>,
        plan: BatchPlan<S::Input>,
        shutdown: Arc<AtomicBool>,
    },

    /// Parallel workers.
    /// - `pending`: batches sent but not yet reported back
    /// - `max_pending`: `prefetch_factor * num_workers`
    /// - `failed`: a fatal error was yielded; the stream is finished
    Pool {
        pool: WorkerPool<WorkerTask<S::Input>, WorkerOutput<S::Message>>,
        plan: BatchPlan<S::Input>,
        pending: usize,
        max_pending: usize,
        timeout: Option<Duration>,
        failed: bool,
    },
}

impl<S: DistSampler> BatchStream<S> {
    /// Starts a stream. For `num_workers > 0` this spawns the worker pool;
    /// otherwise worker 0 is initialized on the calling thread, and its
    /// failure is returned here.
    pub(crate) fn start(
        init: WorkerInit<S>,
        route: Route<S::Message>,
        plan: BatchPlan<S::Input>,
        num_workers: usize,
        config: StreamConfig,
    ) -> Result<Self> {
        if num_workers == 0 {
            let ctx = init.initialize_worker(0)?;
            return Ok(BatchStream::Inline {
                init,
                ctx,
                route,
                plan,
                shutdown: Arc::new(AtomicBool::new(false)),
            });
        }

        let max_pending = config.prefetch_factor * num_workers;
        let poll_interval = config.poll_interval;
        // Room for every in-flight batch plus one init failure per worker, so
        // workers never block on reporting.
        let pool = WorkerPool::new(
            num_workers,
            max_pending,
            max_pending + num_workers,
            move |worker_id, task_rx, output_tx, shutdown| {
                run_sampling_worker(
                    &init,
                    &route,
                    poll_interval,
                    worker_id,
                    task_rx,
                    output_tx,
                    shutdown,
                )
            },
        )?;

        Ok(BatchStream::Pool {
            pool,
            plan,
            pending: 0,
            max_pending,
            timeout: config.timeout,
            failed: false,
        })
    }

    /// Stops new work from starting. Producers blocked on a full channel give up.
    pub(crate) fn halt(&mut self) {
        match self {
            BatchStream::Inline { shutdown, .. } => shutdown.store(true, Ordering::Relaxed),
            BatchStream::Pool { pool, .. } => pool.halt(),
        }
    }

    /// Next raw worker output, or `None` when the inputs are exhausted or a
    /// fatal error has already been yielded.
    pub(crate) fn next_output(&mut self) -> Option<WorkerOutput<S::Message>> {
        match self {
            BatchStream::Inline {
                init,
                ctx,
                route,
                plan,
                shutdown,
            } => {
                if shutdown.load(Ordering::Relaxed) {
                    return None;
                }
                let task = plan.next()?;
                let producer = route.producer(shutdown);
                Some(sample_batch(init.sampler(), ctx, 0, task, producer))
            }

            BatchStream::Pool {
                pool,
                plan,
                pending,
                max_pending,
                timeout,
                failed,
            } => {
                if *failed {
                    return None;
                }

                // Keep the pipeline full up to `max_pending`
                while *pending < *max_pending {
                    match plan.next() {
                        Some(task) => {
                            if let Err(e) = pool.send(task) {
                                *failed = true;
                                return Some(WorkerOutput::failed(e));
                            }
                            *pending += 1;
                        }
                        None => break,
                    }
                }

                if *pending == 0 {
                    return None;
                }

                let received = match timeout {
                    Some(timeout) => pool.output_rx.recv_timeout(*timeout).map_err(|e| match e {
                        RecvTimeoutError::Timeout => LoaderError::WorkerTimeout(*timeout),
                        RecvTimeoutError::Disconnected => LoaderError::WorkerPool(
                            "output channel disconnected - workers may have crashed".to_string(),
                        ),
                    }),
                    None => pool.output_rx.recv().map_err(|_| {
                        LoaderError::WorkerPool(
                            "output channel disconnected - workers may have crashed".to_string(),
                        )
                    }),
                };

                match received {
                    // Init failures are reported before the worker takes a task
                    Ok(output) if output.is_worker_init() => {
                        *failed = true;
                        Some(output)
                    }
                    Ok(output) => {
                        *pending -= 1;
                        Some(output)
                    }
                    Err(e) => {
                        *failed = true;
                        Some(WorkerOutput::failed(e))
                    }
                }
            }
        }
    }
}

/// Iterator over the messages of one pass through the loader's inputs.
///
/// Created by calling `loader.iter()`. Abandoning a pass early can leave
/// sampled messages in the channel; call `reset_channel` before the next pass.
pub struct LoaderIter<'a, S: DistSampler> {
    pub(crate) loader: &'a DistLoader<S>,
    pub(crate) stream: BatchStream<S>,
}

impl<S: DistSampler> Iterator for LoaderIter<'_, S> {
    type Item = Result<S::Message>;

    fn next(&mut self) -> Option<Self::Item> {
        let output = self.stream.next_output()?;
        Some(self.loader.complete_batch(output))
    }
}
