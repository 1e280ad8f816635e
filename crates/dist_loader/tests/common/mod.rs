#![allow(dead_code)]

use dist_loader::dataloader::{current_worker_context, with_worker_rng};
use dist_loader::{DistContext, DistSampler, LoaderError, ProcessGroup, Producer};

use anyhow::{anyhow, bail, Result};
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// What `SeedSampler` sends for each batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledBatch {
    pub global_rank: usize,
    pub seeds: Vec<u64>,
    pub draw: u64,
}

/// Sampler that echoes its seeds, tagged with the sampling worker's rank.
#[derive(Default)]
pub struct SeedSampler {
    /// Global ranks whose sampler instance was built.
    pub initialized: Mutex<Vec<usize>>,
    /// Global rank whose initialization fails.
    pub fail_init_for: Option<usize>,
    /// Seed value that makes sampling fail.
    pub fail_sample_on: Option<u64>,
    /// Seed value that makes sampling fail after the message was sent.
    pub fail_after_send_on: Option<u64>,
    /// Return without sending anything.
    pub silent: bool,
    pub delay: Duration,
}

impl SeedSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_init(global_rank: usize) -> Self {
        Self {
            fail_init_for: Some(global_rank),
            ..Self::default()
        }
    }

    pub fn initialized_ranks(&self) -> Vec<usize> {
        let mut ranks = self.initialized.lock().unwrap().clone();
        ranks.sort();
        ranks
    }
}

impl DistSampler for SeedSampler {
    type Input = u64;
    type Message = SampledBatch;

    fn init_sampler_instance(&self, ctx: &DistContext) -> Result<()> {
        if self.fail_init_for == Some(ctx.global_rank()) {
            bail!("sampler backend refused {}", ctx.worker_name());
        }
        self.initialized.lock().unwrap().push(ctx.global_rank());
        Ok(())
    }

    fn sample(
        &self,
        ctx: &DistContext,
        inputs: Vec<u64>,
        out: &mut Producer<SampledBatch>,
    ) -> Result<()> {
        if current_worker_context().as_ref() != Some(ctx) {
            return Err(anyhow!("worker context was not recorded on this thread"));
        }
        if let Some(bad) = self.fail_sample_on {
            if inputs.contains(&bad) {
                bail!("seed {} has no neighbours", bad);
            }
        }
        if self.silent {
            return Ok(());
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let draw = with_worker_rng(|rng| rng.random_range(0..1_000_000));
        let late_failure = self
            .fail_after_send_on
            .filter(|bad| inputs.contains(bad));
        out.send(SampledBatch {
            global_rank: ctx.global_rank(),
            seeds: inputs,
            draw,
        })?;
        if let Some(bad) = late_failure {
            bail!("post-processing seed {} failed", bad);
        }
        Ok(())
    }
}

/// Wraps a group and logs barrier entry and exit under `label`.
pub struct RecordingGroup<G> {
    pub inner: G,
    pub label: &'static str,
    pub events: Arc<Mutex<Vec<String>>>,
}

impl<G: ProcessGroup> ProcessGroup for RecordingGroup<G> {
    fn rank(&self) -> usize {
        self.inner.rank()
    }

    fn world_size(&self) -> usize {
        self.inner.world_size()
    }

    fn barrier(&self) -> std::result::Result<(), LoaderError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:barrier-enter", self.label));
        self.inner.barrier()?;
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:barrier-exit", self.label));
        Ok(())
    }
}

pub fn seeds(n: u64) -> Vec<u64> {
    (0..n).collect()
}

pub fn all_seeds(batches: &[SampledBatch]) -> Vec<u64> {
    let mut seen: Vec<u64> = batches.iter().flat_map(|b| b.seeds.clone()).collect();
    seen.sort();
    seen
}
