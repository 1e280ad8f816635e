//! src/error.rs
//!
//! Error type shared by the loader, the worker pool and the process groups.
//!
//! Sampler implementations report failures through `anyhow::Error`; the loader
//! wraps them with the worker and phase they came from. Nothing in this crate
//! retries: every variant is surfaced to the caller as-is.

use std::io;
use std::time::Duration;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LoaderError>;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// The sampler could not build its per-worker instance. Fatal for the pool.
    #[error("worker {worker_id} failed during sampler instance initialization: {source:#}")]
    WorkerInit {
        worker_id: usize,
        #[source]
        source: anyhow::Error,
    },

    /// A single batch failed to sample. Iteration may continue.
    #[error("worker {worker_id} failed to sample batch {batch_index}: {source:#}")]
    Sampling {
        worker_id: usize,
        batch_index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("message channel is closed")]
    ChannelClosed,

    #[error("loader has no message channel configured")]
    NoChannel,

    #[error("worker finished a batch without producing a message")]
    MissingOutput,

    #[error("worker pool is shutting down")]
    WorkerShutdown,

    #[error("no batch received from workers within {0:?}")]
    WorkerTimeout(Duration),

    #[error("worker pool failure: {0}")]
    WorkerPool(String),

    #[error("group barrier failed: {0}")]
    Barrier(#[source] io::Error),

    #[error("group rendezvous failed: {0}")]
    Rendezvous(String),

    #[error("invalid loader configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid distributed context: {0}")]
    InvalidContext(String),
}

impl LoaderError {
    /// Whether the error leaves the worker pool unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LoaderError::WorkerInit { .. }
                | LoaderError::WorkerPool(_)
                | LoaderError::WorkerTimeout(_)
                | LoaderError::ChannelClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn worker_init_message_names_worker_and_phase() {
        let err = LoaderError::WorkerInit {
            worker_id: 3,
            source: anyhow!("graph store unreachable"),
        };
        let msg = err.to_string();
        assert!(msg.contains("worker 3"));
        assert!(msg.contains("sampler instance initialization"));
        assert!(msg.contains("graph store unreachable"));
        assert!(err.is_fatal());
    }

    #[test]
    fn sampling_errors_are_not_fatal() {
        let err = LoaderError::Sampling {
            worker_id: 0,
            batch_index: 7,
            source: anyhow!("bad seed"),
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("batch 7"));
    }
}
