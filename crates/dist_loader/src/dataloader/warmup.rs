//! src/dataloader/warmup.rs
//!
//! Scoped warm-up: prime the pipeline with one batch per worker before
//! normal iteration, at a point where every rank is synchronized.
//!
//! ```ignore
//! {
//!     let mut warm = loader.warm_up()?;
//!     let first = warm.next().transpose()?;   // surfaces configuration errors now
//!     warm.finish()?;                          // or just let it drop
//! }
//! for message in loader.iter()? { ... }
//! ```
//!
//! Leaving the scope, by `finish`, early return or unwinding, always:
//! 1. stops the workers from starting new batches,
//! 2. resets the channel (drain, group barrier, swap) if there is one,
//! 3. joins the workers,
//! 4. waits on the group barrier so every rank has torn down,
//! 5. restores the saved prefetch factor.

use log::warn;

use super::iterator::BatchStream;
use super::DistLoader;
use crate::error::{LoaderError, Result};
use crate::sampler::DistSampler;

/// Guard returned by `DistLoader::warm_up`. Iterates like `LoaderIter`.
pub struct WarmUp<'a, S: DistSampler> {
    loader: &'a mut DistLoader<S>,
    stream: Option<BatchStream<S>>,
    saved_prefetch: usize,
    finished: bool,
}

impl<S: DistSampler> DistLoader<S> {
    /// Forces `prefetch_factor` to 1 and starts the worker pool.
    ///
    /// If the pool cannot start, the prefetch factor is restored before the
    /// error is returned.
    pub fn warm_up(&mut self) -> Result<WarmUp<'_, S>> {
        let saved_prefetch = self.config.prefetch_factor;
        self.config.prefetch_factor = 1;

        match self.start_stream() {
            Ok(stream) => Ok(WarmUp {
                loader: self,
                stream: Some(stream),
                saved_prefetch,
                finished: false,
            }),
            Err(e) => {
                self.config.prefetch_factor = saved_prefetch;
                Err(e)
            }
        }
    }
}

impl<S: DistSampler> WarmUp<'_, S> {
    /// Prefetch factor that will be restored on exit.
    pub fn saved_prefetch_factor(&self) -> usize {
        self.saved_prefetch
    }

    /// Prefetch factor in effect inside the scope (always 1).
    pub fn prefetch_factor(&self) -> usize {
        self.loader.config.prefetch_factor
    }

    /// Ends the scope and reports the first teardown error, if any.
    pub fn finish(mut self) -> Result<()> {
        self.exit()
    }

    fn exit(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let mut first_err: Option<LoaderError> = None;

        if let Some(stream) = self.stream.as_mut() {
            stream.halt();
        }

        if self.loader.has_channel() {
            if let Err(e) = self.loader.reset_channel(None) {
                first_err.get_or_insert(e);
            }
        }

        // Joins the worker pool.
        drop(self.stream.take());

        if let Err(e) = self.loader.group.barrier() {
            first_err.get_or_insert(e);
        }

        self.loader.config.prefetch_factor = self.saved_prefetch;

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S: DistSampler> Iterator for WarmUp<'_, S> {
    type Item = Result<S::Message>;

    fn next(&mut self) -> Option<Self::Item> {
        let output = self.stream.as_mut()?.next_output()?;
        Some(self.loader.complete_batch(output))
    }
}

impl<S: DistSampler> Drop for WarmUp<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.exit() {
            warn!("[{}] Warm-up teardown failed: {}", self.loader, e);
        }
    }
}
