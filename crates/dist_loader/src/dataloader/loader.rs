//! src/dataloader/loader.rs
//!
//! The `DistLoader` struct: construction, channel reads, channel reset and the
//! worker startup hook.
//!
//! # Channel reset protocol
//!
//! ```text
//!   rank 0                         rank 1
//!   drain old channel              drain old channel
//!   ──────────── group barrier ─────────────
//!   swap in new channel            swap in new channel
//!   point producers' slot at it    point producers' slot at it
//! ```
//!
//! No rank installs its new channel before every rank has finished draining.
//! A producer that writes into the old channel after the drain but before the
//! barrier is not detected: that message is lost with the old channel.

use log::{debug, info};
use std::fmt;
use std::sync::Arc;

use super::config::DistLoaderConfig;
use super::iterator::{BatchPlan, BatchStream, LoaderIter, StreamConfig};
use super::workers::{Route, WorkerInit, WorkerOutput};
use crate::channel::{Channel, ChannelSlot};
use crate::context::DistContext;
use crate::error::{LoaderError, Result};
use crate::group::ProcessGroup;
use crate::sampler::DistSampler;

/// How sampled messages reach the loader.
pub enum Transport<M> {
    /// Workers write into a channel; the loader reads it.
    /// - `channel`: the loader's receiving handle
    /// - `slot`: what producers resolve on every send
    Channel {
        channel: Channel<M>,
        slot: ChannelSlot<M>,
    },
    /// Workers return messages through the pool; reads are pass-through.
    Unbuffered,
}

impl<M> Transport<M> {
    fn with_channel(channel: Channel<M>) -> Self {
        Transport::Channel {
            slot: ChannelSlot::new(channel.clone()),
            channel,
        }
    }
}

/// Coordinates a sampler, its workers, and the channel they write into.
///
/// # Type parameters:
/// - `S`: the sampler shared by every worker of this loader
pub struct DistLoader<S: DistSampler> {
    pub(crate) current_ctx: DistContext,
    pub(crate) sampler: Arc<S>,
    pub(crate) group: Arc<dyn ProcessGroup>,
    pub(crate) transport: Transport<S::Message>,
    pub(crate) config: DistLoaderConfig,
    pub(crate) inputs: Arc<[S::Input]>,
    pid: u32,
}

impl<S: DistSampler> DistLoader<S> {
    /// Creates a loader for the process described by `current_ctx`.
    ///
    /// # Errors
    /// - invalid configuration (zero batch size, prefetch factor or capacity)
    /// - `group` disagrees with `current_ctx` on rank or world size
    pub fn new(
        current_ctx: DistContext,
        sampler: Arc<S>,
        inputs: Vec<S::Input>,
        group: impl ProcessGroup + 'static,
        config: DistLoaderConfig,
    ) -> Result<Self> {
        config.validate()?;

        if group.rank() != current_ctx.rank() || group.world_size() != current_ctx.world_size() {
            return Err(LoaderError::InvalidContext(format!(
                "process group (rank {}/{}) does not match context {}",
                group.rank(),
                group.world_size(),
                current_ctx
            )));
        }

        let transport = if config.use_channel {
            Transport::with_channel(Channel::with_capacity(config.channel_capacity)?)
        } else {
            Transport::Unbuffered
        };

        let loader = Self {
            current_ctx,
            sampler,
            group: Arc::new(group),
            transport,
            config,
            inputs: inputs.into(),
            pid: std::process::id(),
        };

        info!("[{}] Initialized with PID={}", loader, loader.pid);
        Ok(loader)
    }

    /// Uses `channel` as the message channel instead of the one built from the
    /// configuration. Also turns an unbuffered loader into a channel one.
    pub fn with_channel(mut self, channel: Channel<S::Message>) -> Self {
        self.transport = Transport::with_channel(channel);
        self
    }

    pub fn context(&self) -> &DistContext {
        &self.current_ctx
    }

    pub fn sampler(&self) -> &Arc<S> {
        &self.sampler
    }

    pub fn config(&self) -> &DistLoaderConfig {
        &self.config
    }

    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn prefetch_factor(&self) -> usize {
        self.config.prefetch_factor
    }

    /// Applies to iterators started after the call.
    pub fn set_prefetch_factor(&mut self, factor: usize) -> Result<()> {
        if factor == 0 {
            return Err(LoaderError::InvalidConfig(
                "prefetch factor must be greater than 0".to_string(),
            ));
        }
        self.config.prefetch_factor = factor;
        Ok(())
    }

    /// The loader's receiving channel, `None` for unbuffered loaders.
    pub fn channel(&self) -> Option<&Channel<S::Message>> {
        match &self.transport {
            Transport::Channel { channel, .. } => Some(channel),
            Transport::Unbuffered => None,
        }
    }

    /// The slot producers resolve, `None` for unbuffered loaders.
    pub fn channel_slot(&self) -> Option<&ChannelSlot<S::Message>> {
        match &self.transport {
            Transport::Channel { slot, .. } => Some(slot),
            Transport::Unbuffered => None,
        }
    }

    pub fn has_channel(&self) -> bool {
        matches!(self.transport, Transport::Channel { .. })
    }

    /// The hook each worker runs at startup.
    pub fn worker_init(&self) -> WorkerInit<S> {
        WorkerInit::new(
            self.current_ctx.clone(),
            self.config.num_workers,
            self.config.seed,
            Arc::clone(&self.sampler),
        )
    }

    /// Initializes worker `worker_id` on the calling thread.
    ///
    /// Fails with `LoaderError::WorkerInit` if the sampler instance cannot be
    /// built. The failure is fatal for that worker and is not retried.
    pub fn initialize_worker(&self, worker_id: usize) -> Result<DistContext> {
        self.worker_init().initialize_worker(worker_id)
    }

    /// Returns the next message.
    ///
    /// For unbuffered loaders `out` is the worker's own output and is passed
    /// through. Otherwise blocks until the channel yields a message; there is
    /// no timeout.
    pub fn read_message(&self, out: Option<S::Message>) -> Result<S::Message> {
        match &self.transport {
            Transport::Unbuffered => out.ok_or(LoaderError::MissingOutput),
            Transport::Channel { channel, .. } => {
                let message = channel.recv()?;
                debug!("[{}] Retrieved message", self);
                Ok(message)
            }
        }
    }

    /// Turns one worker output into the batch's message.
    ///
    /// A failed batch whose message already reached the channel has that
    /// message read and discarded, so the next batch reads its own.
    pub(crate) fn complete_batch(&self, output: WorkerOutput<S::Message>) -> Result<S::Message> {
        match output.result {
            Ok(out) => self.read_message(out),
            Err(e) => {
                if output.queued {
                    self.read_message(None)?;
                    debug!("[{}] Discarded message of failed batch", self);
                }
                Err(e)
            }
        }
    }

    /// Drains the current channel, waits for the whole group, then installs
    /// `new_channel` (or a fresh one) for both the loader and its producers.
    ///
    /// Returns `LoaderError::NoChannel` for unbuffered loaders. If the barrier
    /// fails the old channel stays installed.
    pub fn reset_channel(&mut self, new_channel: Option<Channel<S::Message>>) -> Result<()> {
        let name = self.to_string();
        debug!("[{}] Resetting msg channel", name);

        let Transport::Channel { channel, slot } = &mut self.transport else {
            return Err(LoaderError::NoChannel);
        };

        let dropped = channel.drain();
        if dropped > 0 {
            debug!("[{}] Dropped {} stale messages", name, dropped);
        }

        self.group.barrier()?;

        let fresh = match new_channel {
            Some(channel) => channel,
            None => Channel::with_capacity(self.config.channel_capacity)?,
        };
        *channel = fresh.clone();
        slot.replace(fresh);

        debug!(
            "[{}] Channel {} installed (slot version {})",
            name,
            channel.id(),
            slot.version()
        );
        Ok(())
    }

    /// Starts a pass over the inputs. Spawns the worker pool when
    /// `num_workers > 0`; otherwise initializes worker 0 on this thread.
    pub fn iter(&self) -> Result<LoaderIter<'_, S>> {
        Ok(LoaderIter {
            loader: self,
            stream: self.start_stream()?,
        })
    }

    pub(crate) fn start_stream(&self) -> Result<BatchStream<S>> {
        let route = match &self.transport {
            Transport::Channel { slot, .. } => Route::Channel {
                slot: slot.downgrade(),
                version: slot.version(),
                poll_interval: self.config.worker_timeout,
            },
            Transport::Unbuffered => Route::Direct,
        };
        let plan = BatchPlan::new(
            Arc::clone(&self.inputs),
            self.config.batch_size,
            self.config.drop_last,
        );

        BatchStream::start(
            self.worker_init(),
            route,
            plan,
            self.config.num_workers,
            StreamConfig {
                prefetch_factor: self.config.prefetch_factor,
                timeout: self.config.timeout,
                poll_interval: self.config.worker_timeout,
            },
        )
    }
}

impl<S: DistSampler> fmt::Display for DistLoader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DistLoader(pid={})", self.pid)
    }
}

impl<S: DistSampler> fmt::Debug for DistLoader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistLoader")
            .field("pid", &self.pid)
            .field("context", &self.current_ctx)
            .field("num_workers", &self.config.num_workers)
            .field("prefetch_factor", &self.config.prefetch_factor)
            .field("has_channel", &self.has_channel())
            .finish()
    }
}
