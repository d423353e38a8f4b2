//! Background prefetching of split reads.
//!
//! A pump owns one producer thread. The thread pulls `(index, n)` requests
//! from an index generator, performs the read, and pushes the result into a
//! bounded channel; once `max_items` results are waiting it blocks until the
//! consumer catches up.
//!
//! The consumer must issue its reads in exactly the order the generator
//! yields them. Both sides are driven by identical generators, so any
//! divergence is a bug in the caller and panics.

use anyhow::{ensure, Context, Result};
use crossbeam_channel::{bounded, Receiver};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use tracing::debug;

use crate::error::PipelineError;
use crate::sample::{Sample, Split};

/// Infinite (or very long) sequence of `(index, n)` read requests.
pub type IndexGen = Box<dyn Iterator<Item = (usize, usize)> + Send>;

/// The part of a loader that performs the actual reads, shared with pump
/// threads.
pub(crate) trait SampleReader: Send + Sync {
    fn perform_read(&self, split: Split, index: usize, n: usize) -> Result<Vec<Sample>>;
}

type Prefetched = (usize, usize, Result<Vec<Sample>>);

pub(crate) struct Pump {
    split: Split,
    output_rx: Option<Receiver<Prefetched>>,
    worker: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Pump {
    pub(crate) fn spawn(
        reader: Arc<dyn SampleReader>,
        split: Split,
        mut index_gen: IndexGen,
        max_items: usize,
    ) -> Result<Self> {
        ensure!(
            max_items > 0,
            "Cannot create a pump with max_items 0. \
            The queue must hold at least one result."
        );

        let (output_tx, output_rx) = bounded(max_items);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let worker = thread::Builder::new()
            .name(format!("pump-{}", split))
            .spawn(move || {
                while !shutdown_clone.load(Ordering::Relaxed) {
                    let Some((index, n)) = index_gen.next() else {
                        break;
                    };
                    let samples = reader.perform_read(split, index, n);
                    // blocks while the queue is full; fails once the consumer is gone
                    if output_tx.send((index, n, samples)).is_err() {
                        break;
                    }
                }
                debug!(%split, "pump thread exiting");
            })
            .with_context(|| format!("Failed to spawn pump thread for split {}", split))?;

        debug!(%split, max_items, "pump started");
        Ok(Self {
            split,
            output_rx: Some(output_rx),
            worker: Some(worker),
            shutdown,
        })
    }

    /// Takes the next prefetched result, which must be for `(index, n)`.
    pub(crate) fn perform_read(&self, index: usize, n: usize) -> Result<Vec<Sample>> {
        let exhausted = PipelineError::PumpExhausted { split: self.split };
        let rx = self.output_rx.as_ref().ok_or(exhausted.clone())?;
        let (got_index, got_n, samples) = rx.recv().map_err(|_| exhausted)?;
        assert_eq!(
            (got_index, got_n),
            (index, n),
            "pump for split {} is out of step with its consumer",
            self.split
        );
        samples
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // Unblocks a producer waiting on a full queue
        self.output_rx.take();

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Handle to one installed pump, returned by [`Loader::pump`].
///
/// [`Loader::pump`]: super::Loader::pump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PumpId {
    split: Split,
    serial: u64,
}

impl PumpId {
    pub fn split(&self) -> Split {
        self.split
    }
}

/// Installed pumps of a loader. Each pump is only reachable through the id
/// its installer got back, so several consumers can pump the same split.
#[derive(Default)]
pub(crate) struct Pumps {
    next_serial: AtomicU64,
    pumps: Mutex<HashMap<PumpId, Arc<Pump>>>,
}

impl Pumps {
    fn lock(&self) -> MutexGuard<'_, HashMap<PumpId, Arc<Pump>>> {
        self.pumps.lock().expect("pump registry lock poisoned")
    }

    /// Starts a new pump for `split`.
    pub(crate) fn install(
        &self,
        reader: Arc<dyn SampleReader>,
        split: Split,
        index_gen: IndexGen,
        max_items: usize,
    ) -> Result<PumpId> {
        let pump = Arc::new(Pump::spawn(reader, split, index_gen, max_items)?);
        let id = PumpId {
            split,
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
        };
        self.lock().insert(id, pump);
        Ok(id)
    }

    pub(crate) fn remove(&self, id: PumpId) {
        let removed = self.lock().remove(&id);
        // joined outside the lock
        drop(removed);
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: PumpId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Takes the next prefetched read of pump `id`.
    pub(crate) fn read(&self, id: PumpId, index: usize, n: usize) -> Result<Vec<Sample>> {
        let pump = self.lock().get(&id).cloned();
        match pump {
            Some(pump) => pump.perform_read(index, n),
            None => Err(PipelineError::PumpNotInstalled {
                split: id.split,
                serial: id.serial,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleRng;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        reads: AtomicUsize,
    }

    impl SampleReader for Counter {
        fn perform_read(&self, _split: Split, index: usize, n: usize) -> Result<Vec<Sample>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok((index..index + n)
                .map(|i| Sample::new(i, i, SampleRng::new(0)))
                .collect())
        }
    }

    fn requests() -> IndexGen {
        Box::new((0..).map(|i| ((i * 3) % 30, 3)))
    }

    #[test]
    fn delivers_reads_in_generator_order() -> Result<()> {
        let reader = Arc::new(Counter {
            reads: AtomicUsize::new(0),
        });
        let pump = Pump::spawn(reader.clone(), Split::Train, requests(), 4)?;

        for (index, n) in requests().take(25) {
            let samples = pump.perform_read(index, n)?;
            let xs: Vec<_> = samples.iter().filter_map(|s| s.x.as_i64()).collect();
            let expected: Vec<i64> = (index as i64..(index + n) as i64).collect();
            assert_eq!(xs, expected);
        }
        drop(pump);
        assert!(reader.reads.load(Ordering::SeqCst) >= 25);
        Ok(())
    }

    #[test]
    fn finite_generator_reports_exhaustion() -> Result<()> {
        let reader = Arc::new(Counter {
            reads: AtomicUsize::new(0),
        });
        let pump = Pump::spawn(reader, Split::Val, Box::new(vec![(0, 1)].into_iter()), 2)?;
        assert_eq!(pump.perform_read(0, 1)?.len(), 1);
        let err = pump.perform_read(1, 1).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::PumpExhausted { split: Split::Val })
        );
        Ok(())
    }

    #[test]
    #[should_panic(expected = "out of step")]
    fn out_of_order_read_panics() {
        let reader = Arc::new(Counter {
            reads: AtomicUsize::new(0),
        });
        let pump = Pump::spawn(reader, Split::Test, requests(), 2).unwrap();
        let _ = pump.perform_read(3, 3);
    }

    #[test]
    fn pumps_are_addressed_by_id() -> Result<()> {
        let reader = Arc::new(Counter {
            reads: AtomicUsize::new(0),
        });
        let pumps = Pumps::default();

        let first = pumps.install(reader.clone(), Split::Train, requests(), 2)?;
        let second = pumps.install(reader.clone(), Split::Train, requests(), 2)?;
        assert_ne!(first, second);
        assert_eq!(pumps.read(first, 0, 3)?.len(), 3);

        pumps.remove(first);
        assert!(!pumps.contains(first));
        assert!(pumps.contains(second));
        // the second pump still starts at the head of its own sequence
        assert_eq!(pumps.read(second, 0, 3)?.len(), 3);
        assert_eq!(pumps.read(second, 3, 3)?.len(), 3);

        let err = pumps.read(first, 3, 3).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::PumpNotInstalled { split: Split::Train, .. })
        ));

        // removing twice is harmless
        pumps.remove(first);
        assert!(pumps.contains(second));
        Ok(())
    }

    #[test]
    fn rejects_empty_queue() {
        let reader = Arc::new(Counter {
            reads: AtomicUsize::new(0),
        });
        assert!(Pump::spawn(reader, Split::Train, requests(), 0).is_err());
    }
}
