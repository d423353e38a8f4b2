use anyhow::{ensure, Result};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use std::collections::VecDeque;

/// A `Sampler` defines the order in which a view visits sample indices.
///
/// # Method
/// - `iter(epoch)`: returns a sequential or shuffled sequence for that epoch.
///    - The epoch is combined with the base seed so every pass is shuffled
///      differently and still reproducibly.
pub trait Sampler: Send + Sync {
    type Item: Send + Sync;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_>;
}

/// ============================================================================
/// Yields indices sequentially in order `(0,1,2,...,num_samples-1)`.
///
/// # Examples
/// ```ignore
/// let sampler = SequentialSampler::new(5);
/// let indices: Vec<_> = sampler.iter(0).collect();
/// assert_eq!(indices, vec![0, 1, 2, 3, 4]);
/// ```
#[derive(Debug, Clone)]
pub struct SequentialSampler {
    num_samples: usize,
}

impl SequentialSampler {
    pub fn new(num_samples: usize) -> Self {
        Self { num_samples }
    }
}

impl Sampler for SequentialSampler {
    type Item = usize;

    fn iter(&self, _epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        Box::new(0..self.num_samples)
    }
}

/// ============================================================================
/// Shuffles runs of `fetch_size` consecutive indices.
///
/// `0..num_samples` is cut into runs of `fetch_size` (the last one may be
/// shorter), the run order is shuffled and the runs are concatenated. Indices
/// inside a run stay adjacent, so a loader can fetch them with one read.
///
/// # Seed Handling
/// For each epoch the RNG is seeded with `base_seed + epoch`, so every pass
/// gets a fresh order that is still reproducible for the same `base_seed`.
///
/// # Example
/// ```ignore
/// let sampler = ChunkedRandomSampler::new(10, 4, 2204)?;
/// // e.g. [8, 9, 0, 1, 2, 3, 4, 5, 6, 7]
/// let order: Vec<_> = sampler.iter(0).collect();
/// ```
#[derive(Debug, Clone)]
pub struct ChunkedRandomSampler {
    num_samples: usize,
    fetch_size: usize,
    base_seed: u64,
}

impl ChunkedRandomSampler {
    pub fn new(num_samples: usize, fetch_size: usize, base_seed: u64) -> Result<Self> {
        ensure!(
            fetch_size > 0,
            "fetch_size must be > 0, but got fetch_size={}",
            fetch_size
        );
        Ok(Self {
            num_samples,
            fetch_size,
            base_seed,
        })
    }

    #[inline]
    fn derive_rng_for_epoch(&self, epoch: usize) -> StdRng {
        StdRng::seed_from_u64(self.base_seed.wrapping_add(epoch as u64))
    }
}

impl Sampler for ChunkedRandomSampler {
    type Item = usize;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        let mut rng = self.derive_rng_for_epoch(epoch);
        let mut runs = runs(self.num_samples, self.fetch_size);
        runs.shuffle(&mut rng);
        Box::new(
            runs.into_iter()
                .flat_map(|(start, len)| start..start + len),
        )
    }
}

/// Splits `0..num_samples` into `(start, len)` runs of at most `fetch_size`.
fn runs(num_samples: usize, fetch_size: usize) -> Vec<(usize, usize)> {
    (0..num_samples)
        .step_by(fetch_size)
        .map(|start| (start, fetch_size.min(num_samples - start)))
        .collect()
}

/// ============================================================================
/// Endless sequence of batches in serial order, each a list of `(index, n)`
/// reads that together cover exactly `batch_size` samples.
///
/// Reads wrap around to index 0 at the end of the data, so a batch spanning
/// the end is made of two reads.
///
/// ```text
/// num_samples=5, batch_size=3:
///   [(0, 3)]
///   [(3, 2), (0, 1)]
///   [(1, 3)]
/// ```
#[derive(Debug, Clone)]
pub struct SerialBatchIndices {
    num_samples: usize,
    batch_size: usize,
    current: usize,
}

impl SerialBatchIndices {
    pub fn new(num_samples: usize, batch_size: usize) -> Result<Self> {
        ensure!(
            batch_size > 0,
            "batch_size must be > 0, but got batch_size={}",
            batch_size
        );
        Ok(Self {
            num_samples,
            batch_size,
            current: 0,
        })
    }
}

impl Iterator for SerialBatchIndices {
    type Item = Vec<(usize, usize)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_samples == 0 {
            return None;
        }
        let mut batch = Vec::new();
        let mut count = 0;
        while count < self.batch_size {
            let n = (self.batch_size - count).min(self.num_samples - self.current);
            batch.push((self.current, n));
            count += n;
            self.current += n;
            if self.current == self.num_samples {
                self.current = 0;
            }
        }
        Some(batch)
    }
}

/// ============================================================================
/// Endless sequence of batches in random order.
///
/// Runs of `fetch_size` indices are shuffled and consumed in order; a run is
/// split when it does not fit into the current batch and its remainder opens
/// the next batch. When all runs are used up they are reshuffled, continuing
/// the same RNG stream.
///
/// Two instances built with the same arguments yield the same sequence, which
/// is what lets a background pump run ahead of the consumer.
#[derive(Debug, Clone)]
pub struct RandomBatchIndices {
    num_samples: usize,
    batch_size: usize,
    fetch_size: usize,
    rng: StdRng,
    pending: VecDeque<(usize, usize)>,
}

impl RandomBatchIndices {
    pub fn new(
        num_samples: usize,
        batch_size: usize,
        fetch_size: usize,
        random_seed: u64,
    ) -> Result<Self> {
        ensure!(
            batch_size > 0 && fetch_size > 0,
            "batch_size and fetch_size must be > 0, but got batch_size={}, fetch_size={}",
            batch_size,
            fetch_size
        );
        Ok(Self {
            num_samples,
            batch_size,
            fetch_size,
            rng: StdRng::seed_from_u64(random_seed),
            pending: VecDeque::new(),
        })
    }

    fn next_run(&mut self) -> (usize, usize) {
        if self.pending.is_empty() {
            let mut runs = runs(self.num_samples, self.fetch_size);
            runs.shuffle(&mut self.rng);
            self.pending.extend(runs);
        }
        // refilled above, and num_samples > 0 guarantees at least one run
        self.pending.pop_front().unwrap_or((0, 0))
    }
}

impl Iterator for RandomBatchIndices {
    type Item = Vec<(usize, usize)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_samples == 0 {
            return None;
        }
        let mut batch = Vec::new();
        let mut count = 0;
        while count < self.batch_size {
            let (start, len) = self.next_run();
            let n = len.min(self.batch_size - count);
            batch.push((start, n));
            count += n;
            if n < len {
                self.pending.push_front((start + n, len - n));
            }
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod order_tests {
        use super::*;

        #[test]
        fn sequential_covers_range() {
            let sampler = SequentialSampler::new(5);
            assert_eq!(sampler.iter(0).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
            assert_eq!(sampler.iter(3).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        }

        #[test]
        fn chunked_keeps_runs_together() -> Result<()> {
            let sampler = ChunkedRandomSampler::new(100, 8, 2204)?;
            let order: Vec<_> = sampler.iter(0).collect();

            let mut sorted = order.clone();
            sorted.sort();
            assert_eq!(sorted, (0..100).collect::<Vec<_>>());

            // every run starts on a multiple of fetch_size and is contiguous
            let mut i = 0;
            while i < order.len() {
                let start = order[i];
                assert_eq!(start % 8, 0);
                let len = 8usize.min(100 - start);
                assert_eq!(&order[i..i + len], &(start..start + len).collect::<Vec<_>>()[..]);
                i += len;
            }
            Ok(())
        }

        #[test]
        fn chunked_is_reproducible_per_epoch() -> Result<()> {
            let a = ChunkedRandomSampler::new(100, 4, 1)?;
            let b = ChunkedRandomSampler::new(100, 4, 1)?;
            let c = ChunkedRandomSampler::new(100, 4, 2)?;
            let first: Vec<_> = a.iter(0).collect();
            assert_eq!(first, b.iter(0).collect::<Vec<_>>());
            assert_ne!(first, a.iter(1).collect::<Vec<_>>());
            assert_ne!(first, c.iter(0).collect::<Vec<_>>());
            Ok(())
        }

        #[test]
        fn chunked_rejects_zero_fetch_size() {
            assert!(ChunkedRandomSampler::new(10, 0, 0).is_err());
        }
    }

    mod batch_index_tests {
        use super::*;

        fn covered(batch: &[(usize, usize)]) -> usize {
            batch.iter().map(|&(_, n)| n).sum()
        }

        #[test]
        fn serial_wraps_around() -> Result<()> {
            let batches: Vec<_> = SerialBatchIndices::new(5, 3)?.take(3).collect();
            assert_eq!(
                batches,
                vec![vec![(0, 3)], vec![(3, 2), (0, 1)], vec![(1, 3)]]
            );
            Ok(())
        }

        #[test]
        fn serial_batch_larger_than_data() -> Result<()> {
            let batch = SerialBatchIndices::new(2, 5)?.next().unwrap();
            assert_eq!(batch, vec![(0, 2), (0, 2), (0, 1)]);
            Ok(())
        }

        #[test]
        fn random_batches_are_full_and_cover_every_index() -> Result<()> {
            let batches: Vec<_> = RandomBatchIndices::new(30, 7, 4, 2204)?.take(30).collect();
            assert!(batches.iter().all(|b| covered(b) == 7));

            // 30 batches of 7 cover exactly 7 passes over 30 indices
            let mut counts = vec![0; 30];
            for &(start, n) in batches.iter().flatten() {
                assert!(n > 0 && n <= 4);
                for i in start..start + n {
                    counts[i] += 1;
                }
            }
            assert!(counts.iter().all(|&c| c == 7));
            Ok(())
        }

        #[test]
        fn random_batches_follow_seed() -> Result<()> {
            let a: Vec<_> = RandomBatchIndices::new(100, 10, 8, 1)?.take(20).collect();
            let b: Vec<_> = RandomBatchIndices::new(100, 10, 8, 1)?.take(20).collect();
            let c: Vec<_> = RandomBatchIndices::new(100, 10, 8, 2)?.take(20).collect();
            assert_eq!(a, b);
            assert_ne!(a, c);
            Ok(())
        }

        #[test]
        fn empty_data_yields_nothing() -> Result<()> {
            assert!(SerialBatchIndices::new(0, 4)?.next().is_none());
            assert!(RandomBatchIndices::new(0, 4, 2, 0)?.next().is_none());
            Ok(())
        }
    }
}
