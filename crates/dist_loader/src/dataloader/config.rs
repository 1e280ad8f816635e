//! src/dataloader/config.rs
//!
//! Configuration for DistLoader behaviour
//!
//! Example:
//! ```ignore
//! let config = DistLoaderConfig::builder()
//!     .batch_size(512)
//!     .num_workers(4)
//!     .prefetch_factor(2)
//!     .channel_capacity(64)
//!     .seed(7)
//!     .build();
//! ```
//!
//! # Performance considerations:
//! - `num_workers`: each worker builds its own sampler instance, so memory grows
//!   with the pool size.
//! - `prefetch_factor`: batches kept in flight per worker.
//! - `channel_capacity`: bounds how many sampled batches may wait in the
//!   channel; `None` leaves it unbounded.

use std::time::Duration;

use crate::error::{LoaderError, Result};

/// Configuration for DistLoader
#[derive(Debug, Clone)]
pub struct DistLoaderConfig {
    /// Number of input items per sampled batch (default 1)
    pub batch_size: usize,
    /// Whether to drop the last incomplete batch
    pub drop_last: bool,
    /// Number of sampling workers (0 = sample on the loader thread)
    pub num_workers: usize,
    /// Batches in flight per worker (must be > 0)
    pub prefetch_factor: usize,
    /// Capacity of the message channel, `None` for unbounded
    pub channel_capacity: Option<usize>,
    /// Whether the loader reads messages through a channel at all
    pub use_channel: bool,
    /// Base seed for per-worker RNGs
    pub seed: Option<u64>,
    /// Maximum wait for a worker result. `None` waits forever.
    pub timeout: Option<Duration>,
    /// How often blocked workers check for shutdown. Not an error timeout.
    pub worker_timeout: Duration,
}

impl Default for DistLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            drop_last: false,
            num_workers: 0,
            prefetch_factor: 2,
            channel_capacity: None,
            use_channel: true,
            seed: None,
            timeout: None,
            worker_timeout: Duration::from_millis(100),
        }
    }
}

impl DistLoaderConfig {
    pub fn builder() -> DistLoaderConfigBuilder {
        DistLoaderConfigBuilder::default()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(LoaderError::InvalidConfig(
                "batch size must be greater than 0".to_string(),
            ));
        }
        if self.prefetch_factor == 0 {
            return Err(LoaderError::InvalidConfig(
                "prefetch factor must be greater than 0".to_string(),
            ));
        }
        if self.channel_capacity == Some(0) {
            return Err(LoaderError::InvalidConfig(
                "channel capacity must be greater than 0".to_string(),
            ));
        }
        if self.worker_timeout.is_zero() {
            return Err(LoaderError::InvalidConfig(
                "worker poll interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for DistLoaderConfig with method chaining
#[derive(Default)]
pub struct DistLoaderConfigBuilder {
    config: DistLoaderConfig,
}

impl DistLoaderConfigBuilder {
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn drop_last(mut self, drop: bool) -> Self {
        self.config.drop_last = drop;
        self
    }

    pub fn num_workers(mut self, workers: usize) -> Self {
        self.config.num_workers = workers;
        self
    }

    pub fn prefetch_factor(mut self, factor: usize) -> Self {
        self.config.prefetch_factor = factor;
        self
    }

    /// Bound the message channel. Implies `use_channel(true)`.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = Some(capacity);
        self.config.use_channel = true;
        self
    }

    /// With `false`, workers hand their batches straight back through the
    /// pool and `read_message` becomes a pass-through.
    pub fn use_channel(mut self, use_channel: bool) -> Self {
        self.config.use_channel = use_channel;
        self
    }

    /// Set the base seed for per-worker RNGs.
    ///
    /// Worker `k` of the job (by global rank) is seeded with `seed + k`.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Fail iteration if no worker result arrives within `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn worker_timeout(mut self, worker_timeout: Duration) -> Self {
        self.config.worker_timeout = worker_timeout;
        self
    }

    pub fn build(self) -> DistLoaderConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DistLoaderConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.use_channel);
        assert_eq!(config.prefetch_factor, 2);
    }

    #[test]
    fn rejects_zero_sizes() {
        assert!(DistLoaderConfig::builder().batch_size(0).build().validate().is_err());
        assert!(DistLoaderConfig::builder().prefetch_factor(0).build().validate().is_err());
        assert!(DistLoaderConfig::builder().channel_capacity(0).build().validate().is_err());
    }

    #[test]
    fn capacity_turns_channel_back_on() {
        let config = DistLoaderConfig::builder()
            .use_channel(false)
            .channel_capacity(4)
            .build();
        assert!(config.use_channel);
        assert_eq!(config.channel_capacity, Some(4));
    }
}
