//! src/loader/mod.rs
//!
//! Loaders put a source, an operation pipeline and an output stage behind
//! the [`Source`] interface.
//!
//! - [`MemoryCachedLoader`]: materialises every split in memory on first use
//! - [`FileCachedLoader`]: materialises every split into memory-mapped cache
//!   files keyed by a hash of the pipeline configuration
//! - [`LiveLoader`]: no caching; maps logical indices back onto the input
//!
//! All three populate lazily on the first `begin_read_samples()` call and
//! treat later calls as no-ops.

mod file;
mod live;
mod memory;
mod pump;

pub use file::FileCachedLoader;
pub use live::LiveLoader;
pub use memory::MemoryCachedLoader;
pub use pump::{IndexGen, PumpId};

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;

use crate::error::PipelineError;
use crate::operation::Output;
use crate::pipeline::Pipeline;
use crate::sample::{Sample, Split};
use crate::source::{fingerprint, Source};

/// Default bound on prefetched results waiting in a pump's queue.
pub const DEFAULT_PUMP_ITEMS: usize = 100;

/// Progress of a cache population phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A population phase producing about `total` samples is starting.
    Started { total: usize },
    /// Sample `current` (0-based, counted across all splits) was written.
    Advanced { current: usize, total: usize },
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// A [`Source`] that can also prefetch reads in the background.
///
/// Every pump belongs to the caller that installed it. Any number of pumps
/// may run on one split; `read_samples` never goes through them.
pub trait Loader: Source {
    /// Starts a background pump for `split` fed by `index_gen`.
    fn pump(&self, split: Split, index_gen: IndexGen, max_items: usize) -> Result<PumpId>;

    /// Takes the next prefetched read of `pump`. Calls must follow the
    /// pump's `index_gen` exactly.
    fn read_pumped(&self, pump: PumpId, index: usize, n: usize) -> Result<Vec<Sample>>;

    /// Stops `pump`. Unknown or already removed pumps are ignored.
    fn unpump(&self, pump: PumpId);
}

/// Input, operations and output of a loader.
#[derive(Clone)]
pub(crate) struct Stages {
    pub(crate) input: Arc<dyn Source>,
    pub(crate) ops: Pipeline,
    pub(crate) output: Option<Arc<dyn Output>>,
}

impl Stages {
    pub(crate) fn new(
        input: Arc<dyn Source>,
        ops: Pipeline,
        output: Option<Arc<dyn Output>>,
    ) -> Result<Self> {
        if !ops.is_empty() && output.is_none() {
            return Err(PipelineError::MissingOutputStage.into());
        }
        Ok(Self { input, ops, output })
    }

    /// Input sample count scaled by the pipeline multiplier, truncated.
    pub(crate) fn num_samples(&self, split: Split) -> Result<usize> {
        let raw = self.input.num_samples(split)?;
        Ok((raw as f64 * self.ops.multiplier(split)) as usize)
    }

    /// Key identifying everything that determines the cached samples.
    pub(crate) fn hashed_state(&self) -> String {
        let mut state = fingerprint(self.input.name(), &self.input.configuration());
        if let Some(output) = &self.output {
            let output_state = fingerprint(output.name(), &output.configuration());
            state = [state, self.ops.state(), output_state].join("-");
        }
        self.input.hash(&state)
    }

    /// Hands the input's dataset meta to the output stage.
    pub(crate) fn share_meta(&self) {
        if let Some(output) = &self.output {
            output.set_meta(&self.input.meta());
        }
    }

    /// Runs the output stage, if any, over freshly derived samples.
    pub(crate) fn finish(&self, samples: Vec<Sample>) -> Result<Vec<Sample>> {
        match &self.output {
            Some(output) => samples
                .into_iter()
                .map(|s| {
                    output
                        .apply(s)
                        .with_context(|| format!("Output '{}' failed", output.name()))
                })
                .collect(),
            None => Ok(samples),
        }
    }

    /// Feeds every derived sample of `split` to `f`, in order.
    ///
    /// With an output stage each input sample goes through the operations and
    /// the output. Without one the input samples pass through untouched,
    /// in their raw form when `raw` is set.
    pub(crate) fn for_each_sample(
        &self,
        split: Split,
        raw: bool,
        mut f: impl FnMut(Sample) -> Result<()>,
    ) -> Result<()> {
        let n = self.input.num_samples(split)?;
        for index in 0..n {
            let read = if raw && self.output.is_none() {
                self.input.read_raw_samples(split, index, 1)?
            } else {
                self.input.read_samples(split, index, 1)?
            };
            let sample = read
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("Source returned no sample for {} index {}", split, index))?;

            if self.output.is_none() {
                f(sample)?;
                continue;
            }
            for derived in self.finish(self.ops.process_chain(split, sample)?)? {
                f(derived)?;
            }
        }
        Ok(())
    }
}
