//! src/data.rs
//!
//! `Data` assembles a source, its preprocessing and an output stage into a
//! loader chain chosen by the cache mode, and hands out views over the result.
//!
//! | cache mode         | input stage          | output stage         |
//! |--------------------|----------------------|----------------------|
//! | `mem-in`           | `MemoryCachedLoader` | `LiveLoader`         |
//! | `disk-in`          | `FileCachedLoader`   | `LiveLoader`         |
//! | `mem`              | source               | `MemoryCachedLoader` |
//! | `disk`, `*auto*`   | source               | `FileCachedLoader`   |
//! | `none`             | source               | `LiveLoader`         |

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;
use tracing::debug;

use crate::config::{DataOptions, PipelineConfig, Store};
use crate::loader::{FileCachedLoader, LiveLoader, Loader, MemoryCachedLoader, Progress, ProgressCallback};
use crate::operation::{IdentityOutput, Output};
use crate::pipeline::Pipeline;
use crate::registry::PluginRegistry;
use crate::sample::{Meta, Split};
use crate::source::Source;
use crate::views::{Batch, BatchOptions, BatchView, IteratorView, ListView, ViewOptions, ViewOptionsBuilder};

pub struct Data {
    loader: Arc<dyn Loader>,
    options: DataOptions,
}

impl Data {
    /// Builds the loader chain for `options.cache`.
    ///
    /// Without an explicit output stage, preprocessing operations get an
    /// identity output.
    pub fn new(
        input: Arc<dyn Source>,
        ops: Pipeline,
        output: Option<Arc<dyn Output>>,
        options: DataOptions,
    ) -> Result<Self> {
        let output = match output {
            None if !ops.is_empty() => Some(Arc::new(IdentityOutput) as Arc<dyn Output>),
            output => output,
        };

        let (input_store, output_store) = options.cache.stores();
        debug!(cache = %options.cache, ops = ops.len(), "building loader chain");

        let input: Arc<dyn Source> = match input_store {
            Some(Store::Memory) => Arc::new(
                MemoryCachedLoader::new(input, Pipeline::default(), None)?
                    .with_progress(progress(&options, "Caching input samples in memory ...")),
            ),
            Some(Store::Disk) => Arc::new(disk_loader(input, Pipeline::default(), None, &options, "input")?),
            None => input,
        };

        let loader: Arc<dyn Loader> = match output_store {
            Some(Store::Memory) => Arc::new(
                MemoryCachedLoader::new(input, ops, output)?
                    .with_progress(progress(&options, "Caching output samples in memory ...")),
            ),
            Some(Store::Disk) => Arc::new(disk_loader(input, ops, output, &options, "output")?),
            None => Arc::new(LiveLoader::new(input, ops, output)?),
        };

        Ok(Self { loader, options })
    }

    /// Creates the configured plugins from `registry` and builds the pipeline.
    pub fn from_config(config: &PipelineConfig, registry: &PluginRegistry) -> Result<Self> {
        Self::from_config_with_options(config, registry, config.data_options())
    }

    /// Like `from_config`, with runtime options such as a display or an
    /// interrupt flag supplied by the caller.
    pub fn from_config_with_options(
        config: &PipelineConfig,
        registry: &PluginRegistry,
        options: DataOptions,
    ) -> Result<Self> {
        let input = registry.create_source(&config.input.name, &config.input.args)?;
        let ops = config
            .preprocess
            .iter()
            .map(|spec| registry.create_operation(&spec.op, &spec.args))
            .collect::<Result<Vec<_>>>()?;
        let output = match &config.output {
            Some(spec) => Some(registry.create_output(&spec.name, &spec.args)?),
            None if registry.has_output(&config.input.name) => {
                Some(registry.create_output(&config.input.name, &config.input.args)?)
            }
            None => None,
        };
        Self::new(input, Pipeline::new(ops), output, options)
    }

    pub fn loader(&self) -> &Arc<dyn Loader> {
        &self.loader
    }

    pub fn options(&self) -> &DataOptions {
        &self.options
    }

    /// View options seeded with this pipeline's random seed.
    pub fn view_options(&self) -> ViewOptionsBuilder {
        ViewOptions::builder().random_seed(self.options.random_seed)
    }

    pub fn num_samples(&self, split: Split) -> Result<usize> {
        self.loader.begin_read_samples()?;
        let n = self.loader.num_samples(split)?;
        self.loader.end_read_samples()?;
        Ok(n)
    }

    /// Dataset meta of the input, e.g. its labels.
    pub fn meta(&self) -> Result<Meta> {
        self.loader.begin_read_samples()?;
        let meta = self.loader.meta();
        self.loader.end_read_samples()?;
        Ok(meta)
    }

    /// Reads a whole split at once.
    ///
    /// With `randomize` the records are shuffled individually using
    /// `random_seed`; `fetch_size` does not apply.
    pub fn load_list(&self, split: Split, options: &ViewOptions) -> Result<Batch> {
        self.loader.begin_read_samples()?;
        let n = options.limit(self.loader.num_samples(split)?);
        let samples = self.loader.read_samples(split, 0, n)?;
        self.loader.end_read_samples()?;

        let mut records = samples
            .into_iter()
            .map(|sample| options.record(sample))
            .collect::<Result<Vec<_>>>()?;
        if options.randomize {
            records.shuffle(&mut StdRng::seed_from_u64(options.random_seed));
        }
        Batch::from_records(records, options.layout)
    }

    pub fn lazy_list(&self, split: Split, options: ViewOptions) -> Result<ListView> {
        ListView::new(self.loader.clone(), split, options)
    }

    pub fn batches(&self, split: Split, options: ViewOptions, batch: BatchOptions) -> Result<BatchView> {
        BatchView::new(self.loader.clone(), split, options, batch)
    }

    pub fn iter(&self, split: Split, options: ViewOptions) -> Result<IteratorView> {
        IteratorView::new(self.loader.clone(), split, options)
    }
}

fn progress(options: &DataOptions, banner: &str) -> ProgressCallback {
    match &options.display {
        Some(display) => display.progress(banner),
        None => Arc::new(|_: Progress| {}),
    }
}

fn disk_loader(
    input: Arc<dyn Source>,
    ops: Pipeline,
    output: Option<Arc<dyn Output>>,
    options: &DataOptions,
    stage: &str,
) -> Result<FileCachedLoader> {
    let banner = format!("Caching {} samples on disk ...", stage);
    let loader = FileCachedLoader::new(&options.cache_dir, input, ops, output)?
        .with_progress(progress(options, &banner));
    Ok(match &options.interrupt {
        Some(flag) => loader.with_interrupt(flag.clone()),
        None => loader,
    })
}
