//! src/dataloader/mod.rs
//!
//! This module implements the `DistLoader`.
//!
//! The `DistLoader` coordinates a `DistSampler`, a pool of sampling workers and
//! the channel they write into, for one rank of a distributed job.
//!
//! # Architecture Overview
//!
//! ```text
//!      ┌──────────────┐   derive_worker_context   ┌──────────────────┐
//!      │  DistLoader  │ ────────────────────────→ │ Worker threads   │
//!      │  (rank R)    │   init_sampler_instance   │ (global R*P + w) │
//!      └──────┬───────┘                           └────────┬─────────┘
//!             │ read_message                               │ Producer::send
//!             ↓                                            ↓
//!      ┌──────────────┐        ChannelSlot         ┌──────────────┐
//!      │   Channel    │ ←───────────────────────── │  DistSampler │
//!      └──────────────┘                            └──────────────┘
//!             ↑
//!             │ reset_channel: drain → group barrier → swap → propagate
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/dataloader/
//! ├── mod.rs          # Public API exports + module-level architecture docs
//! ├── config.rs       # DistLoaderConfig and builder
//! ├── loader.rs       # DistLoader, Transport, reset and read protocol
//! ├── warmup.rs       # WarmUp guard
//! ├── iterator/
//! │   └── mod.rs      # BatchPlan, BatchStream, LoaderIter
//! ├── workers/
//! │   ├── mod.rs      # WorkerInit and the sampling worker loop
//! │   └── pool.rs     # Generic `WorkerPool<Task, Output>`
//! └── common/
//!     ├── mod.rs
//!     └── thread.rs   # Thread-local worker context and RNG
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! let ctx = DistContext::for_group(world_size, rank, "trainer")?;
//! let config = DistLoaderConfig::builder()
//!     .batch_size(1024)
//!     .num_workers(4)
//!     .build();
//!
//! let mut loader = DistLoader::new(ctx, Arc::new(sampler), seeds, group, config)?;
//!
//! loader.warm_up()?.finish()?;
//! for message in loader.iter()? {
//!     let message = message?;
//! }
//! ```
//!
//! ## Notes:
//! - `num_workers = 0` samples on the loader thread as worker 0.
//! - In-flight batches: `prefetch_factor x max(num_workers, 1)`.

mod common;
mod config;
mod iterator;
mod loader;
mod warmup;
mod workers;

pub use config::{DistLoaderConfig, DistLoaderConfigBuilder};
pub use iterator::LoaderIter;
pub use loader::{DistLoader, Transport};
pub use warmup::WarmUp;
pub use workers::WorkerInit;

pub use common::thread::{
    current_worker_context, init_worker_rng, with_worker_rng, WORKER_CONTEXT, WORKER_RNG,
};
