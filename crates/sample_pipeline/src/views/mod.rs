//! src/views/mod.rs
//!
//! Consumer-facing presentations of a loader's samples.
//!
//! - [`ListView`]: random access by index or range
//! - [`IteratorView`]: one record at a time, optionally endless
//! - [`BatchView`]: fixed-size batches in one of three layouts
//!
//! Views are configured with [`ViewOptions`]:
//! ```ignore
//! let options = ViewOptions::builder()
//!     .randomize(true)
//!     .fetch_size(16)
//!     .with_meta(true)
//!     .build();
//! ```

mod batch;
mod iter;
mod list;

pub use batch::{BatchOptions, BatchView};
pub use iter::IteratorView;
pub use list::ListView;

use anyhow::{anyhow, ensure, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::array::NdArray;
use crate::error::suggest;
use crate::sample::{Meta, Payload, Sample};
use crate::sampler::{ChunkedRandomSampler, Sampler, SequentialSampler};
use crate::transform::{Identity, Transform};

/// Per-payload transform applied by views before returning `x` or `y`.
pub type PayloadTransform = Arc<dyn Transform<Payload, Payload>>;

pub const DEFAULT_RANDOM_SEED: u64 = 2204;
pub const DEFAULT_FETCH_SIZE: usize = 8;

/// One sample as returned by a view. `meta` is only set when the view was
/// built `with_meta`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub x: Payload,
    pub y: Payload,
    pub meta: Option<Meta>,
}

/// How a group of records is arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// A list of `(x, y[, meta])` records
    #[default]
    Tuples,
    /// Separate lists of xs, ys (and metas)
    Lists,
    /// Like `Lists` with xs and ys stacked into dense arrays
    Arrays,
}

impl Layout {
    const NAMES: [&'static str; 3] = ["tuples", "lists", "arrays"];
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layout::Tuples => "tuples",
            Layout::Lists => "lists",
            Layout::Arrays => "arrays",
        })
    }
}

impl FromStr for Layout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tuples" => Ok(Layout::Tuples),
            "lists" => Ok(Layout::Lists),
            "arrays" => Ok(Layout::Arrays),
            other => Err(anyhow!(
                "Invalid layout '{}'{}",
                other,
                suggest(Layout::NAMES, other)
                    .map(|s| format!(" (did you mean '{}'?)", s))
                    .unwrap_or_default()
            )),
        }
    }
}

/// A group of records arranged according to a [`Layout`].
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Tuples(Vec<Record>),
    Lists {
        xs: Vec<Payload>,
        ys: Vec<Payload>,
        metas: Option<Vec<Meta>>,
    },
    Arrays {
        xs: NdArray,
        ys: NdArray,
        metas: Option<Vec<Meta>>,
    },
}

impl Batch {
    pub fn from_records(records: Vec<Record>, layout: Layout) -> Result<Self> {
        if layout == Layout::Tuples {
            return Ok(Batch::Tuples(records));
        }

        let with_meta = records.iter().any(|r| r.meta.is_some());
        let mut xs = Vec::with_capacity(records.len());
        let mut ys = Vec::with_capacity(records.len());
        let mut metas = Vec::with_capacity(records.len());
        for record in records {
            xs.push(record.x);
            ys.push(record.y);
            metas.push(record.meta.unwrap_or_default());
        }
        let metas = with_meta.then_some(metas);

        Ok(match layout {
            Layout::Lists => Batch::Lists { xs, ys, metas },
            _ => Batch::Arrays {
                xs: NdArray::stack(&xs)?,
                ys: NdArray::stack(&ys)?,
                metas,
            },
        })
    }

    pub fn len(&self) -> usize {
        match self {
            Batch::Tuples(records) => records.len(),
            Batch::Lists { xs, .. } => xs.len(),
            Batch::Arrays { xs, .. } => xs.shape().first().copied().unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Options shared by all views.
#[derive(Clone)]
pub struct ViewOptions {
    /// Include each sample's meta in the returned records
    pub with_meta: bool,
    /// Visit samples in shuffled runs of `fetch_size`
    pub randomize: bool,
    pub random_seed: u64,
    /// Length of the runs of adjacent samples read together
    pub fetch_size: usize,
    /// Cap on the number of samples the view exposes
    pub max_samples: Option<usize>,
    /// Keep cycling instead of ending after one pass (iterator and batch views)
    pub infinite: bool,
    /// Arrangement of eagerly loaded lists and of batches
    pub layout: Layout,
    pub transform_x: PayloadTransform,
    pub transform_y: PayloadTransform,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            with_meta: false,
            randomize: false,
            random_seed: DEFAULT_RANDOM_SEED,
            fetch_size: DEFAULT_FETCH_SIZE,
            max_samples: None,
            infinite: false,
            layout: Layout::Tuples,
            transform_x: Arc::new(Identity),
            transform_y: Arc::new(Identity),
        }
    }
}

impl ViewOptions {
    pub fn builder() -> ViewOptionsBuilder {
        ViewOptionsBuilder::default()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(
            self.fetch_size > 0,
            "fetch_size must be > 0, but got fetch_size={}",
            self.fetch_size
        );
        Ok(())
    }

    /// Caps `num_samples` at `max_samples`.
    pub(crate) fn limit(&self, num_samples: usize) -> usize {
        self.max_samples.map_or(num_samples, |max| num_samples.min(max))
    }

    /// Visiting order for one pass over `num_samples` samples.
    pub(crate) fn order(&self, num_samples: usize, epoch: usize) -> Result<Vec<usize>> {
        if self.randomize {
            let sampler = ChunkedRandomSampler::new(num_samples, self.fetch_size, self.random_seed)?;
            Ok(sampler.iter(epoch).collect())
        } else {
            Ok(SequentialSampler::new(num_samples).iter(epoch).collect())
        }
    }

    /// Applies the payload transforms and drops meta unless requested.
    pub(crate) fn record(&self, sample: Sample) -> Result<Record> {
        Ok(Record {
            x: self.transform_x.apply(sample.x)?,
            y: self.transform_y.apply(sample.y)?,
            meta: self.with_meta.then_some(sample.meta),
        })
    }
}

/// Builder for ViewOptions with method chaining
#[derive(Default)]
pub struct ViewOptionsBuilder {
    options: ViewOptions,
}

impl ViewOptionsBuilder {
    pub fn with_meta(mut self, with_meta: bool) -> Self {
        self.options.with_meta = with_meta;
        self
    }

    /// Shuffle the visiting order (in runs of `fetch_size`)
    pub fn randomize(mut self, randomize: bool) -> Self {
        self.options.randomize = randomize;
        self
    }

    pub fn random_seed(mut self, seed: u64) -> Self {
        self.options.random_seed = seed;
        self
    }

    pub fn fetch_size(mut self, fetch_size: usize) -> Self {
        self.options.fetch_size = fetch_size;
        self
    }

    pub fn max_samples(mut self, max_samples: usize) -> Self {
        self.options.max_samples = Some(max_samples);
        self
    }

    pub fn infinite(mut self, infinite: bool) -> Self {
        self.options.infinite = infinite;
        self
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.options.layout = layout;
        self
    }

    pub fn transform_x(mut self, transform: impl Transform<Payload, Payload> + 'static) -> Self {
        self.options.transform_x = Arc::new(transform);
        self
    }

    pub fn transform_y(mut self, transform: impl Transform<Payload, Payload> + 'static) -> Self {
        self.options.transform_y = Arc::new(transform);
        self
    }

    pub fn build(self) -> ViewOptions {
        self.options
    }
}
