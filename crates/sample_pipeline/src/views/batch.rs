use anyhow::{ensure, Result};
use std::sync::Arc;
use tracing::debug;

use super::{Batch, Record, ViewOptions};
use crate::loader::{Loader, PumpId, DEFAULT_PUMP_ITEMS};
use crate::sample::Split;
use crate::sampler::{RandomBatchIndices, SerialBatchIndices};
use crate::source::ReadSession;

type BatchIndices = Box<dyn Iterator<Item = Vec<(usize, usize)>> + Send>;

/// Batch-specific settings of a [`BatchView`].
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub batch_size: usize,
    /// Prefetch reads on a background thread
    pub pump: bool,
    /// Capacity of the pump queue
    pub max_pumped: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            pump: true,
            max_pumped: DEFAULT_PUMP_ITEMS,
        }
    }
}

impl BatchOptions {
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn pump(mut self, pump: bool) -> Self {
        self.pump = pump;
        self
    }

    pub fn max_pumped(mut self, max_pumped: usize) -> Self {
        self.max_pumped = max_pumped;
        self
    }
}

/// Yields fixed-size batches of one split.
///
/// Every batch holds exactly `batch_size` records. Reads wrap around at the
/// end of the data, so a finite view yields `len / batch_size` batches and an
/// infinite one keeps going. With pumping enabled an identical index sequence
/// is handed to the loader, which then prefetches in the background.
pub struct BatchView {
    loader: Arc<dyn Loader>,
    split: Split,
    options: ViewOptions,
    num_batches: usize,
    current: usize,
    indices: BatchIndices,
    pump: Option<PumpId>,
}

impl BatchView {
    pub fn new(
        loader: Arc<dyn Loader>,
        split: Split,
        options: ViewOptions,
        batch: BatchOptions,
    ) -> Result<Self> {
        options.validate()?;
        ensure!(
            batch.batch_size > 0,
            "batch_size must be > 0, but got batch_size={}",
            batch.batch_size
        );
        loader.begin_read_samples()?;
        let num_samples = options.limit(loader.num_samples(split)?);
        loader.end_read_samples()?;

        let make_indices = || -> Result<BatchIndices> {
            Ok(if options.randomize {
                Box::new(RandomBatchIndices::new(
                    num_samples,
                    batch.batch_size,
                    options.fetch_size,
                    options.random_seed,
                )?)
            } else {
                Box::new(SerialBatchIndices::new(num_samples, batch.batch_size)?)
            })
        };
        let indices = make_indices()?;

        let pump = if batch.pump && num_samples > 0 {
            let reads = make_indices()?.flatten();
            let id = loader.pump(split, Box::new(reads), batch.max_pumped)?;
            debug!(%split, max_pumped = batch.max_pumped, "batch view pumping");
            Some(id)
        } else {
            None
        };

        Ok(Self {
            loader,
            split,
            num_batches: num_samples / batch.batch_size,
            options,
            current: 0,
            indices,
            pump,
        })
    }

    /// Number of batches in one finite pass.
    pub fn len(&self) -> usize {
        self.num_batches
    }

    pub fn is_empty(&self) -> bool {
        self.num_batches == 0
    }

    /// Allows a finite view to yield another `len()` batches. The index
    /// sequence continues where it stopped.
    pub fn restart(&mut self) {
        self.current = 0;
    }

    fn read_batch(&mut self, reads: Vec<(usize, usize)>) -> Result<Batch> {
        let session = ReadSession::begin(self.loader.as_ref())?;
        let mut records: Vec<Record> = Vec::new();
        for (index, n) in reads {
            let samples = match self.pump {
                Some(pump) => self.loader.read_pumped(pump, index, n)?,
                None => self.loader.read_samples(self.split, index, n)?,
            };
            for sample in samples {
                records.push(self.options.record(sample)?);
            }
        }
        session.end()?;
        self.current += 1;
        Batch::from_records(records, self.options.layout)
    }
}

impl Iterator for BatchView {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.options.infinite && self.current >= self.num_batches {
            return None;
        }
        let reads = self.indices.next()?;
        Some(self.read_batch(reads))
    }
}

impl Drop for BatchView {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            self.loader.unpump(pump);
        }
    }
}
