use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::info;

use super::pump::{IndexGen, PumpId, Pumps, SampleReader};
use super::{Loader, Progress, ProgressCallback, Stages};
use crate::cache::{Cache, MemoryCache};
use crate::error::PipelineError;
use crate::operation::Output;
use crate::pipeline::Pipeline;
use crate::sample::{Meta, Payload, Sample, SampleRng, Split};
use crate::source::{Configuration, ReadSession, Source};

type SampleCache = MemoryCache<(Payload, Payload), (Meta, SampleRng)>;

struct Inner {
    stages: Stages,
    caches: OnceLock<HashMap<Split, SampleCache>>,
    populating: Mutex<()>,
}

impl Inner {
    fn populate(&self, progress: &ProgressCallback) -> Result<()> {
        let _guard = self.populating.lock().expect("populate lock poisoned");
        if self.caches.get().is_some() {
            return Ok(());
        }

        let stages = &self.stages;
        let session = ReadSession::begin(stages.input.as_ref())?;
        stages.share_meta();

        let total = Split::ALL
            .iter()
            .map(|&split| stages.num_samples(split))
            .sum::<Result<usize>>()?;
        info!(total, "caching samples in memory");
        progress(Progress::Started { total });

        let mut current = 0;
        let mut caches = HashMap::new();
        for split in Split::ALL {
            let mut cache = SampleCache::new();
            stages.for_each_sample(split, false, |sample| {
                cache.write((sample.x, sample.y), (sample.meta, sample.rng))?;
                progress(Progress::Advanced { current, total });
                current += 1;
                Ok(())
            })?;
            caches.insert(split, cache);
        }

        session.end()?;
        let _ = self.caches.set(caches);
        Ok(())
    }

    fn cache(&self, split: Split) -> Result<&SampleCache> {
        self.caches
            .get()
            .and_then(|caches| caches.get(&split))
            .ok_or_else(|| PipelineError::NotPopulated.into())
    }
}

impl SampleReader for Inner {
    fn perform_read(&self, split: Split, index: usize, n: usize) -> Result<Vec<Sample>> {
        Ok(self
            .cache(split)?
            .read(index, n)?
            .into_iter()
            .map(|((x, y), (meta, rng))| Sample { x, y, meta, rng })
            .collect())
    }
}

/// Materialises every split in memory on the first `begin_read_samples()`.
pub struct MemoryCachedLoader {
    inner: Arc<Inner>,
    pumps: Pumps,
    progress: ProgressCallback,
}

impl MemoryCachedLoader {
    pub fn new(
        input: Arc<dyn Source>,
        ops: Pipeline,
        output: Option<Arc<dyn Output>>,
    ) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                stages: Stages::new(input, ops, output)?,
                caches: OnceLock::new(),
                populating: Mutex::new(()),
            }),
            pumps: Pumps::default(),
            progress: Arc::new(|_: Progress| {}),
        })
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }
}

impl Source for MemoryCachedLoader {
    fn name(&self) -> &str {
        self.inner.stages.input.name()
    }

    fn configuration(&self) -> Configuration {
        self.inner.stages.input.configuration()
    }

    fn num_samples(&self, split: Split) -> Result<usize> {
        Ok(self.inner.cache(split)?.len())
    }

    fn read_samples(&self, split: Split, index: usize, n: usize) -> Result<Vec<Sample>> {
        self.inner.perform_read(split, index, n)
    }

    fn hash(&self, state: &str) -> String {
        self.inner.stages.input.hash(state)
    }

    fn begin_read_samples(&self) -> Result<()> {
        self.inner.populate(&self.progress)
    }

    fn meta(&self) -> Meta {
        self.inner.stages.input.meta()
    }
}

impl Loader for MemoryCachedLoader {
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
