use anyhow::{ensure, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

use super::pump::{IndexGen, PumpId, Pumps, SampleReader};
use super::{Loader, Stages};
use crate::error::PipelineError;
use crate::operation::Output;
use crate::pipeline::Pipeline;
use crate::sample::{Meta, Sample, SampleRng, Split};
use crate::source::{Configuration, ReadSession, Source};

/// Per-split index mapping between the logical and the raw sample space.
#[derive(Debug, Clone, Copy)]
struct SplitLayout {
    multiplier: usize,
    raw: usize,
    logical: usize,
}

struct Inner {
    stages: Stages,
    layouts: OnceLock<HashMap<Split, SplitLayout>>,
    populating: Mutex<()>,
    rngs: Mutex<HashMap<Split, Vec<Option<SampleRng>>>>,
}

impl Inner {
    fn populate(&self) -> Result<()> {
        let _guard = self.populating.lock().expect("populate lock poisoned");
        if self.layouts.get().is_some() {
            return Ok(());
        }

        let stages = &self.stages;
        let session = ReadSession::begin(stages.input.as_ref())?;
        stages.share_meta();

        let mut layouts = HashMap::new();
        let mut rngs = HashMap::new();
        for split in Split::ALL {
            let multiplier = stages.ops.multiplier(split);
            if multiplier < 1.0 || multiplier.fract() != 0.0 {
                return Err(PipelineError::NonIntegralMultiplier { split, multiplier }.into());
            }
            let raw = stages.input.num_samples(split)?;
            let layout = SplitLayout {
                multiplier: multiplier as usize,
                raw,
                logical: stages.num_samples(split)?,
            };
            debug!(%split, raw, logical = layout.logical, multiplier = layout.multiplier, "live split layout");
            layouts.insert(split, layout);
            rngs.insert(split, vec![None; raw]);
        }

        session.end()?;
        *self.rngs.lock().expect("rng map lock poisoned") = rngs;
        let _ = self.layouts.set(layouts);
        Ok(())
    }

    fn layout(&self, split: Split) -> Result<SplitLayout> {
        self.layouts
            .get()
            .and_then(|layouts| layouts.get(&split))
            .copied()
            .ok_or_else(|| PipelineError::NotPopulated.into())
    }

    /// Returns the generator a raw sample must start from, remembering the
    /// first one seen for `raw_index`.
    fn stable_rng(&self, split: Split, raw_index: usize, fresh: SampleRng) -> SampleRng {
        let mut rngs = self.rngs.lock().expect("rng map lock poisoned");
        match rngs.get_mut(&split).and_then(|slots| slots.get_mut(raw_index)) {
            Some(Some(stored)) => stored.clone(),
            Some(slot) => {
                *slot = Some(fresh.clone());
                fresh
            }
            None => fresh,
        }
    }
}

impl SampleReader for Inner {
    fn perform_read(&self, split: Split, index: usize, n: usize) -> Result<Vec<Sample>> {
        let layout = self.layout(split)?;
        let end = index.saturating_add(n);
        ensure!(
            end <= layout.logical,
            PipelineError::IndexOutOfRange {
                index: end as isize - 1,
                len: layout.logical,
            }
        );
        if n == 0 {
            return Ok(Vec::new());
        }

        let m = layout.multiplier;
        let raw_start = index / m;
        let raw_end = end.div_ceil(m).min(layout.raw);
        let offset = index % m;

        let raw_samples = self
            .stages
            .input
            .read_samples(split, raw_start, raw_end - raw_start)?;

        let mut derived = Vec::with_capacity((raw_end - raw_start) * m);
        for (raw_index, mut sample) in (raw_start..).zip(raw_samples) {
            sample.rng = self.stable_rng(split, raw_index, sample.rng);
            let produced = self
                .stages
                .finish(self.stages.ops.process_chain(split, sample)?)?;
            if produced.len() != m {
                return Err(PipelineError::MultiplierMismatch {
                    split,
                    raw: raw_index,
                    produced: produced.len(),
                    expected: m,
                }
                .into());
            }
            derived.extend(produced);
        }

        Ok(derived.into_iter().skip(offset).take(n).collect())
    }
}

/// Serves samples straight from the input without caching.
///
/// Each split's operations must multiply the sample count by a whole number
/// `m`. Logical index `i` is then output `i % m` of raw sample `i / m`, so a
/// read of `n` logical samples only touches the raw samples it needs.
pub struct LiveLoader {
    inner: Arc<Inner>,
    pumps: Pumps,
}

impl LiveLoader {
    pub fn new(
        input: Arc<dyn Source>,
        ops: Pipeline,
        output: Option<Arc<dyn Output>>,
    ) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                stages: Stages::new(input, ops, output)?,
                layouts: OnceLock::new(),
                populating: Mutex::new(()),
                rngs: Mutex::new(HashMap::new()),
            }),
            pumps: Pumps::default(),
        })
    }
}

impl Source for LiveLoader {
    fn name(&self) -> &str {
        self.inner.stages.input.name()
    }

    fn configuration(&self) -> Configuration {
        self.inner.stages.input.configuration()
    }

    fn num_samples(&self, split: Split) -> Result<usize> {
        Ok(self.inner.layout(split)?.logical)
    }

    fn read_samples(&self, split: Split, index: usize, n: usize) -> Result<Vec<Sample>> {
        self.inner.perform_read(split, index, n)
    }

    fn hash(&self, state: &str) -> String {
        self.inner.stages.input.hash(state)
    }

    fn begin_read_samples(&self) -> Result<()> {
        self.inner.populate()
    }

    fn meta(&self) -> Meta {
        self.inner.stages.input.meta()
    }
}

impl Loader for LiveLoader {
    fn pump(&self, split: Split, index_gen: IndexGen, max_items: usize) -> Result<PumpId> {
        self.pumps
            .install(self.inner.clone(), split, index_gen, max_items)
    }

    fn read_pumped(&self, pump: PumpId, index: usize, n: usize) -> Result<Vec<Sample>> {
        self.pumps.read(pump, index, n)
    }

    fn unpump(&self, pump: PumpId) {
        self.pumps.remove(pump)
    }
}
