//! src/group/mod.rs
//!
//! Distributed process groups.
//!
//! The loader only needs one collective: a blocking barrier over every member
//! of its group. Three implementations are provided:
//! - `SoloGroup`: a group of one; the barrier returns immediately.
//! - `LocalGroup`: ranks living in one process (threads), sharing a
//!   `std::sync::Barrier`. Used for single-machine jobs and tests.
//! - `TcpGroup`: ranks in separate processes, rendezvousing at rank 0.
//!
//! Barriers have no timeout and cannot be cancelled: a peer that never
//! arrives stalls the whole group.

mod tcp;

pub use tcp::TcpGroup;

use std::sync::{Arc, Barrier};

use crate::error::Result;

/// A set of processes that synchronize through a barrier.
pub trait ProcessGroup: Send + Sync {
    /// This member's index in `[0, world_size)`.
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Blocks until every member of the group has called `barrier`.
    fn barrier(&self) -> Result<()>;
}

impl<G: ProcessGroup + ?Sized> ProcessGroup for Arc<G> {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn world_size(&self) -> usize {
        (**self).world_size()
    }

    fn barrier(&self) -> Result<()> {
        (**self).barrier()
    }
}

/// Single-member group.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoloGroup;

impl ProcessGroup for SoloGroup {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

/// In-process group member. Create all members at once with `LocalGroup::create`.
#[derive(Debug, Clone)]
pub struct LocalGroup {
    rank: usize,
    world_size: usize,
    barrier: Arc<Barrier>,
}

impl LocalGroup {
    /// Returns one handle per rank, in rank order.
    pub fn create(world_size: usize) -> Vec<LocalGroup> {
        let barrier = Arc::new(Barrier::new(world_size.max(1)));
        (0..world_size)
            .map(|rank| LocalGroup {
                rank,
                world_size,
                barrier: barrier.clone(),
            })
            .collect()
    }
}

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn barrier(&self) -> Result<()> {
        self.barrier.wait();
        Ok(())
    }
}
