//! src/dataloader/common/mod.rs
//!
//! Utilities shared by the loader, the iterator and the worker threads.

pub mod thread;
