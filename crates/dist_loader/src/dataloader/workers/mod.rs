//! Worker management for parallel sampling.
//!
//! - `pool`: generic thread pool
//! - this module: what a sampling worker does at startup (`WorkerInit`) and
//!   for every batch (`run_sampling_worker`, `sample_batch`)
//!
//! Every worker, pooled or inline, starts by deriving its own `DistContext`
//! and building its sampler instance. A failure there is fatal for the
//! worker: it reports `LoaderError::WorkerInit` once and exits without
//! touching any task.

pub(crate) mod pool;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::channel::WeakSlot;
use crate::context::{effective_pool_size, DistContext};
use crate::dataloader::common::thread::{init_worker_rng, record_worker_context};
use crate::error::{LoaderError, Result};
use crate::sampler::{DistSampler, Producer};

/// One batch of inputs handed to a worker.
#[derive(Debug)]
pub(crate) struct WorkerTask<I> {
    pub(crate) batch_index: usize,
    pub(crate) inputs: Vec<I>,
}

/// What a worker reports per task.
/// - `result`: `Some(message)` for unbuffered loaders, `None` when the
///   message went into the channel
/// - `queued`: a message for this batch is in the channel, even if `result`
///   is an error
pub(crate) struct WorkerOutput<M> {
    pub(crate) result: Result<Option<M>>,
    pub(crate) queued: bool,
}

impl<M> WorkerOutput<M> {
    /// Failure that happened before anything was sent.
    pub(crate) fn failed(err: LoaderError) -> Self {
        Self {
            result: Err(err),
            queued: false,
        }
    }

    pub(crate) fn is_worker_init(&self) -> bool {
        matches!(self.result, Err(LoaderError::WorkerInit { .. }))
    }
}

/// Worker startup hook.
///
/// Cheap to clone; each worker thread gets its own copy.
pub struct WorkerInit<S> {
    parent: DistContext,
    num_workers: usize,
    seed: Option<u64>,
    sampler: Arc<S>,
}

impl<S> Clone for WorkerInit<S> {
    fn clone(&self) -> Self {
        Self {
            parent: self.parent.clone(),
            num_workers: self.num_workers,
            seed: self.seed,
            sampler: Arc::clone(&self.sampler),
        }
    }
}

impl<S: DistSampler> WorkerInit<S> {
    pub(crate) fn new(
        parent: DistContext,
        num_workers: usize,
        seed: Option<u64>,
        sampler: Arc<S>,
    ) -> Self {
        Self {
            parent,
            num_workers,
            seed,
            sampler,
        }
    }

    pub fn pool_size(&self) -> usize {
        effective_pool_size(self.num_workers)
    }

    /// Derives the worker's context, builds its sampler instance and records
    /// the context as the calling thread's identity.
    ///
    /// Nothing is recorded when the sampler fails.
    pub fn initialize_worker(&self, worker_id: usize) -> Result<DistContext> {
        if worker_id >= self.pool_size() {
            return Err(LoaderError::InvalidContext(format!(
                "worker {} out of range for pool of {}",
                worker_id,
                self.pool_size()
            )));
        }

        let ctx = self.parent.derive_worker_context(worker_id, self.num_workers);
        info!(
            "Worker-{} initialized (current_ctx_worker={})",
            worker_id,
            ctx.worker_name()
        );

        self.sampler
            .init_sampler_instance(&ctx)
            .map_err(|source| LoaderError::WorkerInit { worker_id, source })?;
        info!("Sampler instance initialized in worker-{}", worker_id);

        if let Some(seed) = self.seed {
            init_worker_rng(ctx.global_rank(), seed);
        }
        record_worker_context(ctx.clone());
        Ok(ctx)
    }

    pub(crate) fn sampler(&self) -> &S {
        &self.sampler
    }
}

/// Where a worker's producers deliver messages.
pub(crate) enum Route<M> {
    Channel {
        slot: WeakSlot<M>,
        version: u64,
        poll_interval: Duration,
    },
    Direct,
}

impl<M> Route<M> {
    pub(crate) fn producer(&self, shutdown: &Arc<AtomicBool>) -> Producer<M> {
        match self {
            Route::Channel {
                slot,
                version,
                poll_interval,
            } => Producer::channel(slot.clone(), *version, shutdown.clone(), *poll_interval),
            Route::Direct => Producer::direct(),
        }
    }
}

impl<M> Clone for Route<M> {
    fn clone(&self) -> Self {
        match self {
            Route::Channel {
                slot,
                version,
                poll_interval,
            } => Route::Channel {
                slot: slot.clone(),
                version: *version,
                poll_interval: *poll_interval,
            },
            Route::Direct => Route::Direct,
        }
    }
}

/// Runs the sampler for one batch.
pub(crate) fn sample_batch<S: DistSampler>(
    sampler: &S,
    ctx: &DistContext,
    worker_id: usize,
    task: WorkerTask<S::Input>,
    mut producer: Producer<S::Message>,
) -> WorkerOutput<S::Message> {
    let batch_index = task.batch_index;
    let sampled = sampler.sample(ctx, task.inputs, &mut producer);
    let queued = producer.queued();

    let result = match sampled {
        Err(source) => Err(LoaderError::Sampling {
            worker_id,
            batch_index,
            source,
        }),
        Ok(()) if producer.sent() == 0 => Err(LoaderError::MissingOutput),
        Ok(()) => Ok(producer.into_output()),
    };
    WorkerOutput { result, queued }
}

/// Body of a pooled sampling worker.
pub(crate) fn run_sampling_worker<S: DistSampler>(
    init: &WorkerInit<S>,
    route: &Route<S::Message>,
    poll_interval: Duration,
    worker_id: usize,
    task_rx: Receiver<WorkerTask<S::Input>>,
    output_tx: Sender<WorkerOutput<S::Message>>,
    shutdown: Arc<AtomicBool>,
) {
    let ctx = match init.initialize_worker(worker_id) {
        Ok(ctx) => ctx,
        Err(e) => {
            let _ = output_tx.send(WorkerOutput::failed(e));
            return;
        }
    };

    loop {
        let task = match task_rx.recv_timeout(poll_interval) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let producer = route.producer(&shutdown);
        let output = sample_batch(init.sampler(), &ctx, worker_id, task, producer);
        if output_tx.send(output).is_err() {
            break;
        }
    }

    debug!("{} exiting", ctx.worker_name());
}
