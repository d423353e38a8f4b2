//! Ordered chain of preprocessing operations.
//!
//! Each stage maps every sample produced so far to its own outputs, so the
//! fan-out of the whole chain comes out depth-first: all samples derived from
//! the first output of stage one precede those derived from its second.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::operation::Operation;
use crate::sample::{Sample, Split};
use crate::source::fingerprint;

#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Operation>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Operation>>) -> Self {
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn stages(&self) -> &[Arc<dyn Operation>] {
        &self.stages
    }

    /// Product of the stage multipliers for `split`; stages that do not apply
    /// contribute 1.
    pub fn multiplier(&self, split: Split) -> f64 {
        self.stages
            .iter()
            .filter(|op| op.applies_to(split))
            .map(|op| op.multiplier())
            .product()
    }

    /// Runs `sample` through every stage that applies to `split`.
    pub fn process_chain(&self, split: Split, sample: Sample) -> Result<Vec<Sample>> {
        let mut samples = vec![sample];
        for op in self.stages.iter().filter(|op| op.applies_to(split)) {
            let mut next = Vec::with_capacity(samples.len());
            for sample in samples {
                next.extend(
                    op.process(sample)
                        .with_context(|| format!("Operation '{}' failed", op.name()))?,
                );
            }
            samples = next;
        }
        Ok(samples)
    }

    /// Stage fingerprints joined with `-`, in order.
    pub fn state(&self) -> String {
        self.stages
            .iter()
            .map(|op| fingerprint(op.name(), &op.configuration()))
            .collect::<Vec<_>>()
            .join("-")
    }
}
