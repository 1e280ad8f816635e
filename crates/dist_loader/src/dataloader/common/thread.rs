//! Thread-local worker identity.
//!
//! Each worker thread records the `DistContext` it derived at startup, plus an
//! optional RNG seeded from that context, for the rest of its life.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;

use crate::context::DistContext;

thread_local! {
    /// Context recorded by `initialize_worker` on this thread.
    pub static WORKER_CONTEXT: RefCell<Option<DistContext>> = const { RefCell::new(None) };

    /// Deterministic per-worker RNG, present when the loader has a seed.
    pub static WORKER_RNG: RefCell<Option<StdRng>> = const { RefCell::new(None) };
}

/// Context of the worker running on the current thread, if any.
pub fn current_worker_context() -> Option<DistContext> {
    WORKER_CONTEXT.with(|ctx| ctx.borrow().clone())
}

pub(crate) fn record_worker_context(ctx: DistContext) {
    WORKER_CONTEXT.with(|slot| *slot.borrow_mut() = Some(ctx));
}

/// Seeds the worker RNG with `base_seed + global_rank`, so every worker in the
/// job draws a different but reproducible stream.
pub fn init_worker_rng(global_rank: usize, base_seed: u64) {
    WORKER_RNG.with(|rng| {
        let seed = base_seed.wrapping_add(global_rank as u64);
        *rng.borrow_mut() = Some(StdRng::seed_from_u64(seed));
    })
}

/// Runs `f` with the worker RNG, or with a thread RNG outside seeded workers.
pub fn with_worker_rng<R>(f: impl FnOnce(&mut dyn rand::RngCore) -> R) -> R {
    WORKER_RNG.with(|rng| {
        let mut rng_ref = rng.borrow_mut();
        match rng_ref.as_mut() {
            Some(rng) => f(rng),
            None => f(&mut rand::rng()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn same_rank_same_stream() {
        init_worker_rng(3, 42);
        let a: Vec<u32> = (0..4).map(|_| with_worker_rng(|r| r.random())).collect();
        init_worker_rng(3, 42);
        let b: Vec<u32> = (0..4).map(|_| with_worker_rng(|r| r.random())).collect();
        init_worker_rng(4, 42);
        let c: Vec<u32> = (0..4).map(|_| with_worker_rng(|r| r.random())).collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn context_is_thread_local() {
        let ctx = DistContext::for_group(1, 0, "trainer").unwrap();
        record_worker_context(ctx.clone());
        assert_eq!(current_worker_context(), Some(ctx));
        let other = std::thread::spawn(current_worker_context).join().unwrap();
        assert_eq!(other, None);
    }
}
