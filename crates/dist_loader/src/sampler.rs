//! src/sampler.rs
//!
//! The sampler side of the loader.
//!
//! A `DistSampler` is shared (via `Arc`) between the loader and all of its
//! workers. Each worker calls `init_sampler_instance` once at startup with its
//! own derived `DistContext`, then `sample` once per batch. Sampled messages
//! are handed to a `Producer`, which routes them either into the loader's
//! active channel or, for unbuffered loaders, straight back to the worker.

use anyhow::Result;
use crossbeam_channel::SendTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::channel::WeakSlot;
use crate::context::DistContext;
use crate::error::LoaderError;

/// Produces messages for a `DistLoader`.
///
/// Implementations must be `Send + Sync`: one instance is shared by every
/// worker thread of a loader. Per-worker state belongs in thread-locals set up
/// by `init_sampler_instance`, or behind the worker's `DistContext`.
pub trait DistSampler: Send + Sync + 'static {
    /// One seed item. The loader groups them into batches.
    type Input: Clone + Send + Sync + 'static;

    /// Opaque message delivered to the loader.
    type Message: Send + 'static;

    /// Builds the per-worker runtime instance. Called once per worker before
    /// any call to `sample` on that worker.
    fn init_sampler_instance(&self, ctx: &DistContext) -> Result<()>;

    /// Samples one batch and sends the result through `out`.
    fn sample(
        &self,
        ctx: &DistContext,
        inputs: Vec<Self::Input>,
        out: &mut Producer<Self::Message>,
    ) -> Result<()>;
}

enum Sink<M> {
    Channel {
        slot: WeakSlot<M>,
        /// Slot version of the channel this producer's stream reads.
        version: u64,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    },
    Direct(Option<M>),
}

/// Sending handle given to `DistSampler::sample` for one batch.
pub struct Producer<M> {
    sink: Sink<M>,
    sent: usize,
    channel_version: Option<u64>,
}

impl<M> Producer<M> {
    pub(crate) fn channel(
        slot: WeakSlot<M>,
        version: u64,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sink: Sink::Channel {
                slot,
                version,
                shutdown,
                poll_interval,
            },
            sent: 0,
            channel_version: None,
        }
    }

    pub(crate) fn direct() -> Self {
        Self {
            sink: Sink::Direct(None),
            sent: 0,
            channel_version: None,
        }
    }

    /// Sends `message` to the loader.
    ///
    /// In channel mode the active channel is looked up on every call and must
    /// still be the one the producer was created for; after a reset the
    /// message is dropped with `ChannelClosed`. If the channel is full the
    /// send blocks, giving up when the pool shuts down or a reset retires it.
    /// Exactly one message is accepted per batch.
    pub fn send(&mut self, message: M) -> std::result::Result<(), LoaderError> {
        if self.sent > 0 {
            return Err(LoaderError::WorkerPool(
                "samplers send exactly one message per batch".to_string(),
            ));
        }

        match &mut self.sink {
            Sink::Channel {
                slot,
                version: expected,
                shutdown,
                poll_interval,
            } => {
                if shutdown.load(Ordering::Relaxed) {
                    return Err(LoaderError::WorkerShutdown);
                }
                let slot = slot.upgrade().ok_or(LoaderError::ChannelClosed)?;
                let (version, tx) = slot.sender();
                if version != *expected {
                    return Err(LoaderError::ChannelClosed);
                }
                let mut message = message;

                loop {
                    match tx.send_timeout(message, *poll_interval) {
                        Ok(()) => break,
                        Err(SendTimeoutError::Timeout(returned)) => {
                            if shutdown.load(Ordering::Relaxed) {
                                return Err(LoaderError::WorkerShutdown);
                            }
                            if slot.version() != version {
                                return Err(LoaderError::ChannelClosed);
                            }
                            message = returned;
                        }
                        Err(SendTimeoutError::Disconnected(_)) => {
                            return Err(LoaderError::ChannelClosed)
                        }
                    }
                }

                self.channel_version = Some(version);
            }
            Sink::Direct(slot) => *slot = Some(message),
        }

        self.sent += 1;
        Ok(())
    }

    /// Number of messages accepted so far (0 or 1).
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Slot version of the channel the last message went into.
    pub fn channel_version(&self) -> Option<u64> {
        self.channel_version
    }

    /// Whether a message for this batch is sitting in the loader's channel.
    pub(crate) fn queued(&self) -> bool {
        self.sent > 0 && matches!(self.sink, Sink::Channel { .. })
    }

    /// The message kept for the loader in unbuffered mode.
    pub(crate) fn into_output(self) -> Option<M> {
        match self.sink {
            Sink::Direct(message) => message,
            Sink::Channel { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelSlot};

    #[test]
    fn channel_producer_writes_into_active_channel() {
        let first = Channel::unbounded();
        let slot = ChannelSlot::new(first.clone());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut out = Producer::channel(slot.downgrade(), 0, shutdown.clone(), Duration::from_millis(5));
        out.send(1).unwrap();
        assert_eq!(out.channel_version(), Some(0));

        let second = Channel::unbounded();
        slot.replace(second.clone());
        let mut out = Producer::channel(slot.downgrade(), slot.version(), shutdown, Duration::from_millis(5));
        out.send(2).unwrap();

        assert_eq!(first.try_recv(), Some(1));
        assert_eq!(second.try_recv(), Some(2));
        assert_eq!(out.channel_version(), Some(1));
        assert!(out.into_output().is_none());
    }

    #[test]
    fn blocked_send_gives_up_on_shutdown() {
        let slot = ChannelSlot::new(Channel::bounded(1).unwrap());
        let shutdown = Arc::new(AtomicBool::new(false));
        slot.current().send(1).unwrap();

        let handle = {
            let weak = slot.downgrade();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || {
                let mut out = Producer::channel(weak, 0, shutdown, Duration::from_millis(5));
                let result = out.send(2);
                (result, out.sent())
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        shutdown.store(true, Ordering::Relaxed);
        let (result, sent) = handle.join().unwrap();
        assert!(matches!(result, Err(LoaderError::WorkerShutdown)));
        assert_eq!(sent, 0);
        assert_eq!(slot.current().len(), 1);
    }

    #[test]
    fn blocked_send_drops_message_after_reset() {
        let old = Channel::bounded(1).unwrap();
        let slot = ChannelSlot::new(old.clone());
        old.send(0).unwrap();

        let weak = slot.downgrade();
        let handle = std::thread::spawn(move || {
            let mut out = Producer::channel(weak, 0, Arc::new(AtomicBool::new(false)), Duration::from_millis(5));
            out.send(1)
        });

        std::thread::sleep(Duration::from_millis(20));
        let fresh = Channel::unbounded();
        slot.replace(fresh.clone());

        assert!(matches!(handle.join().unwrap(), Err(LoaderError::ChannelClosed)));
        assert!(fresh.is_empty());
    }

    #[test]
    fn producer_takes_one_message_per_batch() {
        let mut out = Producer::direct();
        out.send("batch").unwrap();
        assert!(out.send("again").is_err());
        assert_eq!(out.sent(), 1);
        assert_eq!(out.into_output(), Some("batch"));
    }

    #[test]
    fn dropped_slot_closes_producer() {
        let slot = ChannelSlot::new(Channel::<u8>::unbounded());
        let mut out = Producer::channel(slot.downgrade(), 0, Arc::new(AtomicBool::new(false)), Duration::from_millis(5));
        drop(slot);
        assert!(matches!(out.send(1), Err(LoaderError::ChannelClosed)));
    }

    #[test]
    fn send_after_replace_does_not_reach_the_new_channel() {
        let old = Channel::unbounded();
        let slot = ChannelSlot::new(old.clone());
        let mut out = Producer::channel(slot.downgrade(), slot.version(), Arc::new(AtomicBool::new(false)), Duration::from_millis(5));

        // The slot moves on between the producer's creation and its send.
        let fresh = Channel::unbounded();
        slot.replace(fresh.clone());

        assert!(matches!(out.send(7), Err(LoaderError::ChannelClosed)));
        assert!(!out.queued());
        assert!(fresh.is_empty());
        assert!(old.is_empty());
    }

    #[test]
    fn queued_only_after_a_channel_send() {
        let slot = ChannelSlot::new(Channel::unbounded());
        let mut out = Producer::channel(slot.downgrade(), 0, Arc::new(AtomicBool::new(false)), Duration::from_millis(5));
        assert!(!out.queued());
        out.send(1).unwrap();
        assert!(out.queued());

        let mut direct = Producer::direct();
        direct.send(1).unwrap();
        assert!(!direct.queued());
    }
}
