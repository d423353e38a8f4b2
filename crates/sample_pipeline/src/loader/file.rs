use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info, warn};

use super::pump::{IndexGen, PumpId, Pumps, SampleReader};
use super::{Loader, Progress, ProgressCallback, Stages};
use crate::cache::{Cache, CacheData, SerializedFileCache};
use crate::error::PipelineError;
use crate::operation::Output;
use crate::pipeline::Pipeline;
use crate::sample::{Meta, Sample, SampleRng, Split};
use crate::source::{Configuration, ReadSession, Source};

/// Deletes every cache file of a pipeline state unless disarmed. Covers both
/// error returns and panics during population.
struct Cleanup<'a> {
    paths: &'a [(Split, PathBuf)],
    armed: bool,
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for (_, path) in self.paths {
            if path.exists() {
                match std::fs::remove_file(path) {
                    Ok(()) => debug!(path = %path.display(), "removed cache file"),
                    Err(err) => warn!(path = %path.display(), %err, "failed to remove cache file"),
                }
            }
        }
    }
}

struct Inner {
    stages: Stages,
    cache_dir: PathBuf,
    caches: OnceLock<HashMap<Split, SerializedFileCache>>,
    populating: Mutex<()>,
}

impl Inner {
    fn compress(&self) -> bool {
        self.stages.output.is_some()
    }

    fn cache_paths(&self) -> Vec<(Split, PathBuf)> {
        let hashed_state = self.stages.hashed_state();
        Split::ALL
            .iter()
            .map(|&split| {
                let file_name = format!("{}-{}.cache", hashed_state, split);
                (split, self.cache_dir.join(file_name))
            })
            .collect()
    }

    fn populate(&self, progress: &ProgressCallback, interrupt: &AtomicBool) -> Result<()> {
        let _guard = self.populating.lock().expect("populate lock poisoned");
        if self.caches.get().is_some() {
            return Ok(());
        }

        let stages = &self.stages;
        let session = ReadSession::begin(stages.input.as_ref())?;
        stages.share_meta();

        let paths = self.cache_paths();
        let missing: Vec<_> = paths.iter().filter(|(_, path)| !path.exists()).collect();
        let total = missing
            .iter()
            .map(|(split, _)| stages.num_samples(*split))
            .sum::<Result<usize>>()?;

        if missing.is_empty() {
            debug!(dir = %self.cache_dir.display(), "reusing cache files");
        } else {
            std::fs::create_dir_all(&self.cache_dir).with_context(|| {
                format!("Failed to create cache directory {}", self.cache_dir.display())
            })?;
            info!(total, dir = %self.cache_dir.display(), "caching samples on disk");

            let mut cleanup = Cleanup {
                paths: &paths,
                armed: true,
            };
            progress(Progress::Started { total });

            let mut current = 0;
            for (split, path) in missing {
                let mut cache = SerializedFileCache::create(path, self.compress())?;
                cache.set_meta(Value::Object(stages.input.meta()));
                stages.for_each_sample(*split, true, |sample| {
                    if interrupt.load(Ordering::Relaxed) {
                        return Err(PipelineError::Interrupted.into());
                    }
                    let meta = serde_json::to_value((&sample.meta, &sample.rng))?;
                    cache.write(CacheData::Pair(sample.x, sample.y), meta)?;
                    progress(Progress::Advanced { current, total });
                    current += 1;
                    Ok(())
                })?;
                cache.close()?;
                debug!(%split, path = %path.display(), "cache file written");
            }
            cleanup.armed = false;
        }

        let caches = paths
            .iter()
            .map(|(split, path)| -> Result<(Split, SerializedFileCache)> {
                Ok((*split, SerializedFileCache::open(path, self.compress())?))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        session.end()?;
        let _ = self.caches.set(caches);
        Ok(())
    }

    fn cache(&self, split: Split) -> Result<&SerializedFileCache> {
        self.caches
            .get()
            .and_then(|caches| caches.get(&split))
            .ok_or_else(|| PipelineError::NotPopulated.into())
    }
}

impl SampleReader for Inner {
    fn perform_read(&self, split: Split, index: usize, n: usize) -> Result<Vec<Sample>> {
        self.cache(split)?
            .read(index, n)?
            .into_iter()
            .map(|(data, meta)| {
                let (x, y) = match data {
                    CacheData::Pair(x, y) => (x, y),
                    CacheData::Single(_) => anyhow::bail!("Cache entry is not an (x, y) pair"),
                };
                let (meta, rng): (Meta, SampleRng) =
                    serde_json::from_value(meta).context("Malformed cache entry meta")?;
                let sample = Sample { x, y, meta, rng };
                if self.stages.output.is_none() {
                    self.stages.input.recover_raw_sample(sample)
                } else {
                    Ok(sample)
                }
            })
            .collect()
    }
}

/// Materialises every split into cache files named
/// `{hashed_state}-{split}.cache` under the cache directory.
///
/// Existing files are reused as they are. If generating any file fails, all
/// cache files of the pipeline state are deleted before the error is
/// returned.
pub struct FileCachedLoader {
    inner: Arc<Inner>,
    pumps: Pumps,
    progress: ProgressCallback,
    interrupt: Arc<AtomicBool>,
}

impl FileCachedLoader {
    pub fn new(
        cache_dir: impl AsRef<Path>,
        input: Arc<dyn Source>,
        ops: Pipeline,
        output: Option<Arc<dyn Output>>,
    ) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                stages: Stages::new(input, ops, output)?,
                cache_dir: cache_dir.as_ref().to_path_buf(),
                caches: OnceLock::new(),
                populating: Mutex::new(()),
            }),
            pumps: Pumps::default(),
            progress: Arc::new(|_: Progress| {}),
            interrupt: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Population stops with `Interrupted` once `flag` is set.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// The cache files of this loader's pipeline state, one per split.
    pub fn cache_paths(&self) -> Vec<PathBuf> {
        self.inner
            .cache_paths()
            .into_iter()
            .map(|(_, path)| path)
            .collect()
    }
}

impl Source for FileCachedLoader {
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
        self.inner.populate(&self.progress, &self.interrupt)
    }

    fn meta(&self) -> Meta {
        self.inner.stages.input.meta()
    }
}

impl Loader for FileCachedLoader {
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
