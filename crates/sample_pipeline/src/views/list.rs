use anyhow::Result;
use std::sync::Arc;

use super::{Record, ViewOptions};
use crate::error::PipelineError;
use crate::loader::Loader;
use crate::sample::Split;

/// Random access to the samples of one split.
///
/// Indices follow the usual negative-index convention (`-1` is the last
/// sample). When randomized, the visiting order is fixed once at construction.
pub struct ListView {
    loader: Arc<dyn Loader>,
    split: Split,
    options: ViewOptions,
    num_samples: usize,
    order: Option<Vec<usize>>,
}

impl ListView {
    pub fn new(loader: Arc<dyn Loader>, split: Split, options: ViewOptions) -> Result<Self> {
        options.validate()?;
        loader.begin_read_samples()?;
        let num_samples = options.limit(loader.num_samples(split)?);
        loader.end_read_samples()?;

        let order = if options.randomize {
            Some(options.order(num_samples, 0)?)
        } else {
            None
        };

        Ok(Self {
            loader,
            split,
            options,
            num_samples,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.num_samples
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    fn out_of_range(&self, index: isize) -> PipelineError {
        PipelineError::IndexOutOfRange {
            index,
            len: self.num_samples,
        }
    }

    /// Resolves a possibly negative position against the view length.
    fn normalize(&self, index: isize) -> Result<usize> {
        let resolved = if index < 0 {
            index + self.num_samples as isize
        } else {
            index
        };
        usize::try_from(resolved).map_err(|_| self.out_of_range(index).into())
    }

    fn resolve(&self, position: usize) -> usize {
        self.order.as_ref().map_or(position, |order| order[position])
    }

    /// Returns the record at `index`.
    pub fn get(&self, index: isize) -> Result<Record> {
        let position = self.normalize(index)?;
        if position >= self.num_samples {
            return Err(self.out_of_range(index).into());
        }

        self.loader.begin_read_samples()?;
        let samples = self
            .loader
            .read_samples(self.split, self.resolve(position), 1)?;
        self.loader.end_read_samples()?;

        let sample = samples
            .into_iter()
            .next()
            .ok_or_else(|| self.out_of_range(index))?;
        self.options.record(sample)
    }

    /// Returns the records in `[start, stop)`.
    ///
    /// Missing bounds default to the start and the end of the view. Negative
    /// bounds count from the end. A start at or past the end, or a stop past
    /// the end, is out of range.
    pub fn slice(&self, start: Option<isize>, stop: Option<isize>) -> Result<Vec<Record>> {
        let start_raw = start.unwrap_or(0);
        let stop_raw = stop.unwrap_or(self.num_samples as isize);
        let start = self.normalize(start_raw)?;
        let stop = self.normalize(stop_raw)?;
        if start >= self.num_samples {
            return Err(self.out_of_range(start_raw).into());
        }
        if stop > self.num_samples {
            return Err(self.out_of_range(stop_raw).into());
        }
        if stop <= start {
            return Ok(Vec::new());
        }

        self.loader.begin_read_samples()?;
        let samples = match &self.order {
            Some(order) => {
                let mut samples = Vec::with_capacity(stop - start);
                for &index in &order[start..stop] {
                    samples.extend(self.loader.read_samples(self.split, index, 1)?);
                }
                samples
            }
            None => self
                .loader
                .read_samples(self.split, start, stop - start)?,
        };
        self.loader.end_read_samples()?;

        samples
            .into_iter()
            .map(|sample| self.options.record(sample))
            .collect()
    }

    /// Reads every record of the view, in view order.
    pub fn to_vec(&self) -> Result<Vec<Record>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        self.slice(None, None)
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Record>> + '_ {
        (0..self.num_samples).map(move |i| self.get(i as isize))
    }
}
