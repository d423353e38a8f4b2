#![allow(dead_code)]

use anyhow::Result;
use sample_pipeline::{Configuration, Meta, Operation, Sample, SampleRng, Source, Split};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Integer dataset: train=100, val=10, test=20 samples with x=i, y=i+5 and
/// meta {"meta": i}. Counts how often reads are opened and closed.
#[derive(Default)]
pub struct Numbers {
    pub begins: AtomicUsize,
    pub ends: AtomicUsize,
    pub reads: AtomicUsize,
}

impl Numbers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn ends(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Source for Numbers {
    fn name(&self) -> &str {
        "numbers"
    }

    fn configuration(&self) -> Configuration {
        Configuration::from([("size".to_string(), json!([100, 10, 20]))])
    }

    fn num_samples(&self, split: Split) -> Result<usize> {
        Ok(match split {
            Split::Train => 100,
            Split::Val => 10,
            Split::Test => 20,
        })
    }

    fn read_samples(&self, split: Split, index: usize, n: usize) -> Result<Vec<Sample>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let len = self.num_samples(split)?;
        anyhow::ensure!(index + n <= len, "read past the end of {}", split);
        Ok((index..index + n)
            .map(|i| Sample::new(i, i + 5, SampleRng::for_index(2204, i)).with_meta("meta", i))
            .collect())
    }

    fn begin_read_samples(&self) -> Result<()> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn end_read_samples(&self) -> Result<()> {
        self.ends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn meta(&self) -> Meta {
        let mut meta = Meta::new();
        meta.insert("labels".into(), json!(["even", "odd"]));
        meta
    }
}

/// Emits `copies` samples per input on the splits it applies to, tagging
/// each with its copy number and a random draw from the sample RNG.
pub struct Copies {
    pub copies: usize,
    pub splits: Vec<Split>,
}

impl Operation for Copies {
    fn name(&self) -> &str {
        "copies"
    }

    fn configuration(&self) -> Configuration {
        Configuration::from([("copies".to_string(), json!(self.copies))])
    }

    fn multiplier(&self) -> f64 {
        self.copies as f64
    }

    fn applies_to(&self, split: Split) -> bool {
        self.splits.contains(&split)
    }

    fn process(&self, sample: Sample) -> Result<Vec<Sample>> {
        use rand::Rng;
        let mut rng = sample.rng.clone();
        Ok((0..self.copies)
            .map(|copy| {
                let draw: u32 = rng.random();
                sample
                    .clone()
                    .with_meta("copy", copy)
                    .with_meta("draw", draw)
            })
            .collect())
    }
}

pub fn xs(samples: &[Sample]) -> Vec<i64> {
    samples.iter().map(|s| s.x.as_i64().unwrap_or(-1)).collect()
}
