use anyhow::Result;
use std::sync::Arc;

use super::{Record, ViewOptions};
use crate::error::PipelineError;
use crate::loader::Loader;
use crate::sample::Split;
use crate::source::ReadSession;

/// Yields the records of one split one at a time.
///
/// After a full pass the position is reset and, when randomized, the order is
/// reshuffled for the next epoch. A finite view then returns `None` once and
/// can be iterated again; an infinite view continues with the next pass.
pub struct IteratorView {
    loader: Arc<dyn Loader>,
    split: Split,
    options: ViewOptions,
    num_samples: usize,
    epoch: usize,
    position: usize,
    order: Vec<usize>,
}

impl IteratorView {
    pub fn new(loader: Arc<dyn Loader>, split: Split, options: ViewOptions) -> Result<Self> {
        options.validate()?;
        loader.begin_read_samples()?;
        let num_samples = options.limit(loader.num_samples(split)?);
        loader.end_read_samples()?;
        let order = options.order(num_samples, 0)?;

        Ok(Self {
            loader,
            split,
            options,
            num_samples,
            epoch: 0,
            position: 0,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.num_samples
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    /// Number of completed passes.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    fn start_next_epoch(&mut self) -> Result<()> {
        self.epoch += 1;
        self.position = 0;
        self.order = self.options.order(self.num_samples, self.epoch)?;
        Ok(())
    }

    fn read(&self, index: usize) -> Result<Record> {
        let session = ReadSession::begin(self.loader.as_ref())?;
        let samples = self.loader.read_samples(self.split, index, 1)?;
        session.end()?;
        let sample = samples
            .into_iter()
            .next()
            .ok_or(PipelineError::IndexOutOfRange {
                index: index as isize,
                len: self.num_samples,
            })?;
        self.options.record(sample)
    }
}

impl Iterator for IteratorView {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_samples == 0 {
            return None;
        }
        if self.position >= self.num_samples {
            if let Err(err) = self.start_next_epoch() {
                return Some(Err(err));
            }
            if !self.options.infinite {
                return None;
            }
        }

        let index = self.order[self.position];
        self.position += 1;
        Some(self.read(index))
    }
}
