//! src/channel.rs
//!
//! Message channel between sampling workers and the loader.
//!
//! - `Channel`: a FIFO queue (bounded or unbounded) on top of `crossbeam_channel`.
//!   Many producers, one consumer.
//! - `ChannelSlot`: the shared, version-tagged reference producers use to find
//!   the channel that is currently active. The loader replaces its content
//!   during a reset; producers resolve it on every send.
//! - `WeakSlot`: what producers actually hold, so a dropped loader does not
//!   keep its channel alive.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::error::{LoaderError, Result};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(0);

/// Multi-producer, single-consumer FIFO of opaque messages.
///
/// Cloning is cheap and yields a handle on the same queue.
pub struct Channel<M> {
    id: u64,
    capacity: Option<usize>,
    tx: Sender<M>,
    rx: Receiver<M>,
}

impl<M> Channel<M> {
    pub fn unbounded() -> Self {
        let (tx, rx) = unbounded();
        Self::from_parts(None, tx, rx)
    }

    /// Bounded channel. `capacity` must be > 0 (a rendezvous channel would
    /// deadlock an inline producer).
    pub fn bounded(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(LoaderError::InvalidConfig(
                "channel capacity must be > 0".to_string(),
            ));
        }
        let (tx, rx) = bounded(capacity);
        Ok(Self::from_parts(Some(capacity), tx, rx))
    }

    /// `None` builds an unbounded channel.
    pub fn with_capacity(capacity: Option<usize>) -> Result<Self> {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Ok(Self::unbounded()),
        }
    }

    fn from_parts(capacity: Option<usize>, tx: Sender<M>, rx: Receiver<M>) -> Self {
        Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            tx,
            rx,
        }
    }

    /// Process-unique identity of the underlying queue.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Whether both handles point at the same queue.
    pub fn same_channel(&self, other: &Channel<M>) -> bool {
        self.id == other.id
    }

    /// Blocks while a bounded channel is full.
    pub fn send(&self, message: M) -> Result<()> {
        self.tx.send(message).map_err(|_| LoaderError::ChannelClosed)
    }

    /// Blocks until a message is available. No timeout.
    pub fn recv(&self) -> Result<M> {
        self.rx.recv().map_err(|_| LoaderError::ChannelClosed)
    }

    pub fn try_recv(&self) -> Option<M> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Pops until the queue reports empty and returns how many messages were
    /// discarded. A producer that races in after the last pop is not caught.
    pub fn drain(&self) -> usize {
        let mut dropped = 0;
        while self.try_recv().is_some() {
            dropped += 1;
        }
        dropped
    }

    pub(crate) fn sender(&self) -> Sender<M> {
        self.tx.clone()
    }
}

impl<M> Clone for Channel<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            capacity: self.capacity,
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<M> std::fmt::Debug for Channel<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

struct SlotInner<M> {
    channel: RwLock<Channel<M>>,
    version: AtomicU64,
}

/// Shared reference to the active channel.
///
/// Only the loader writes it, and only inside the barrier-protected reset.
/// The version increases by one on each replacement so producers can tell
/// which channel generation they wrote into.
pub struct ChannelSlot<M> {
    inner: Arc<SlotInner<M>>,
}

impl<M> ChannelSlot<M> {
    pub fn new(channel: Channel<M>) -> Self {
        Self {
            inner: Arc::new(SlotInner {
                channel: RwLock::new(channel),
                version: AtomicU64::new(0),
            }),
        }
    }

    pub fn current(&self) -> Channel<M> {
        self.inner
            .channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Sender of the active channel, tagged with the slot version it was read at.
    pub(crate) fn sender(&self) -> (u64, Sender<M>) {
        let channel = self
            .inner
            .channel
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        (self.version(), channel.sender())
    }

    /// Installs `channel` and returns the one it replaced.
    pub fn replace(&self, channel: Channel<M>) -> Channel<M> {
        let mut guard = self
            .inner
            .channel
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let old = std::mem::replace(&mut *guard, channel);
        self.inner.version.fetch_add(1, Ordering::AcqRel);
        old
    }

    pub fn downgrade(&self) -> WeakSlot<M> {
        WeakSlot {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<M> Clone for ChannelSlot<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Non-owning handle on a `ChannelSlot`.
pub struct WeakSlot<M> {
    inner: Weak<SlotInner<M>>,
}

impl<M> WeakSlot<M> {
    pub fn upgrade(&self) -> Option<ChannelSlot<M>> {
        self.inner.upgrade().map(|inner| ChannelSlot { inner })
    }
}

impl<M> Clone for WeakSlot<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fifo_across_producers_per_producer() {
        let channel = Channel::unbounded();
        let handles: Vec<_> = (0..3)
            .map(|p| {
                let tx = channel.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        tx.send((p, i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut last = [None::<usize>; 3];
        while let Some((p, i)) = channel.try_recv() {
            if let Some(prev) = last[p] {
                assert!(i > prev, "producer {} out of order", p);
            }
            last[p] = Some(i);
        }
        assert_eq!(last, [Some(99); 3]);
    }

    #[test]
    fn drain_empties_and_counts() {
        let channel = Channel::bounded(8).unwrap();
        for i in 0..5 {
            channel.send(i).unwrap();
        }
        assert_eq!(channel.drain(), 5);
        assert!(channel.is_empty());
        assert_eq!(channel.drain(), 0);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(Channel::<u8>::bounded(0).is_err());
        assert_eq!(Channel::<u8>::with_capacity(None).unwrap().capacity(), None);
    }

    #[test]
    fn slot_replace_bumps_version_and_redirects_senders() {
        let first = Channel::unbounded();
        let slot = ChannelSlot::new(first.clone());
        assert_eq!(slot.version(), 0);

        let second = Channel::unbounded();
        let old = slot.replace(second.clone());
        assert!(old.same_channel(&first));
        assert_eq!(slot.version(), 1);

        let (version, tx) = slot.sender();
        assert_eq!(version, 1);
        tx.send(42).unwrap();
        assert_eq!(second.try_recv(), Some(42));
        assert!(first.is_empty());
    }

    #[test]
    fn weak_slot_dies_with_owner() {
        let slot = ChannelSlot::new(Channel::<u32>::unbounded());
        let weak = slot.downgrade();
        assert!(weak.upgrade().is_some());
        drop(slot);
        assert!(weak.upgrade().is_none());
    }
}
