//! src/context.rs
//!
//! Position of a process (or worker) in the two-level rank hierarchy.
//!
//! A job is made of `world_size` loader processes. Each loader runs a pool of
//! `P = max(num_workers, 1)` workers, so the job as a whole has
//! `world_size * P` workers. Every worker gets a `global_rank` in
//! `[0, world_size * P)`; no two workers anywhere in the job share one.
//!
//! ```text
//!   rank 0 (P = 3)        rank 1 (P = 3)
//!   ┌──────────────┐      ┌──────────────┐
//!   │ w0 w1 w2     │      │ w0 w1 w2     │
//!   └──────────────┘      └──────────────┘
//!   global 0  1  2        global 3  4  5
//! ```

use std::fmt;

use crate::error::{LoaderError, Result};

/// Group name given to every context derived for a sampling worker.
pub const WORKER_GROUP_NAME: &str = "mp_sampling_worker";

/// Immutable descriptor of where a process sits in the distributed job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DistContext {
    world_size: usize,
    rank: usize,
    global_world_size: usize,
    global_rank: usize,
    group_name: String,
}

impl DistContext {
    /// Creates a context, checking that both ranks fall inside their worlds.
    pub fn new(
        world_size: usize,
        rank: usize,
        global_world_size: usize,
        global_rank: usize,
        group_name: impl Into<String>,
    ) -> Result<Self> {
        if world_size == 0 || global_world_size == 0 {
            return Err(LoaderError::InvalidContext(format!(
                "world sizes must be > 0 (world_size={}, global_world_size={})",
                world_size, global_world_size
            )));
        }
        if rank >= world_size {
            return Err(LoaderError::InvalidContext(format!(
                "rank {} out of range for world_size {}",
                rank, world_size
            )));
        }
        if global_rank >= global_world_size {
            return Err(LoaderError::InvalidContext(format!(
                "global_rank {} out of range for global_world_size {}",
                global_rank, global_world_size
            )));
        }

        Ok(Self {
            world_size,
            rank,
            global_world_size,
            global_rank,
            group_name: group_name.into(),
        })
    }

    /// Context for a loader process whose group is the whole job, i.e. its
    /// global coordinates equal its group coordinates.
    pub fn for_group(world_size: usize, rank: usize, group_name: impl Into<String>) -> Result<Self> {
        Self::new(world_size, rank, world_size, rank, group_name)
    }

    /// Derives the context of worker `worker_id` in a pool of `num_workers`.
    ///
    /// `num_workers == 0` means the loader samples in its own thread; the pool
    /// then counts as a single worker. The derived context uses the worker
    /// coordinates for both its group and global fields.
    pub fn derive_worker_context(&self, worker_id: usize, num_workers: usize) -> DistContext {
        let pool_size = effective_pool_size(num_workers);
        debug_assert!(
            worker_id < pool_size,
            "worker_id {} out of range for pool of {}",
            worker_id,
            pool_size
        );

        let world_size = self.world_size * pool_size;
        let rank = self.rank * pool_size + worker_id;

        DistContext {
            world_size,
            rank,
            global_world_size: world_size,
            global_rank: rank,
            group_name: WORKER_GROUP_NAME.to_string(),
        }
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn global_world_size(&self) -> usize {
        self.global_world_size
    }

    pub fn global_rank(&self) -> usize {
        self.global_rank
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    /// Name used in logs, e.g. `mp_sampling_worker-5`.
    pub fn worker_name(&self) -> String {
        format!("{}-{}", self.group_name, self.rank)
    }

    /// Whether this context was derived for a sampling worker.
    pub fn is_worker(&self) -> bool {
        self.group_name == WORKER_GROUP_NAME
    }
}

impl fmt::Display for DistContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(rank={}/{}, global_rank={}/{})",
            self.group_name, self.rank, self.world_size, self.global_rank, self.global_world_size
        )
    }
}

/// Pool size actually used for `num_workers` (0 runs inline as one worker).
pub fn effective_pool_size(num_workers: usize) -> usize {
    if num_workers > 0 {
        num_workers
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn derivation_covers_every_global_rank_once() {
        for world_size in 1..=4 {
            for num_workers in 0..=5 {
                let pool = effective_pool_size(num_workers);
                let mut seen = HashSet::new();

                for rank in 0..world_size {
                    let parent = DistContext::for_group(world_size, rank, "trainer").unwrap();
                    for worker_id in 0..pool {
                        let ctx = parent.derive_worker_context(worker_id, num_workers);
                        assert_eq!(ctx.global_world_size(), world_size * pool);
                        assert!(ctx.global_rank() < ctx.global_world_size());
                        assert!(
                            seen.insert(ctx.global_rank()),
                            "duplicate global rank {} (W={}, P={})",
                            ctx.global_rank(),
                            world_size,
                            num_workers
                        );
                    }
                }

                let expected: HashSet<usize> = (0..world_size * pool).collect();
                assert_eq!(seen, expected);
            }
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let parent = DistContext::for_group(3, 2, "trainer").unwrap();
        let a = parent.derive_worker_context(1, 4);
        let b = parent.derive_worker_context(1, 4);
        assert_eq!(a, b);
        assert_eq!(a.global_rank(), 9);
        assert_eq!(a.group_name(), WORKER_GROUP_NAME);
    }

    #[test]
    fn zero_workers_counts_as_one() {
        let parent = DistContext::for_group(2, 1, "trainer").unwrap();
        let ctx = parent.derive_worker_context(0, 0);
        assert_eq!(ctx.global_world_size(), 2);
        assert_eq!(ctx.global_rank(), 1);
        assert_eq!(ctx.worker_name(), "mp_sampling_worker-1");
        assert!(ctx.is_worker());
        assert!(!parent.is_worker());
    }

    #[test]
    fn rejects_out_of_range_ranks() {
        assert!(DistContext::new(2, 2, 2, 0, "g").is_err());
        assert!(DistContext::new(2, 0, 4, 4, "g").is_err());
        assert!(DistContext::new(0, 0, 1, 0, "g").is_err());
    }
}
