use anyhow::Result;

use crate::sample::{Meta, Sample, Split};
use crate::source::Configuration;
use crate::transform::Transform;

/// A preprocessing step turning one sample into zero or more samples.
pub trait Operation: Send + Sync {
    fn name(&self) -> &str;

    fn configuration(&self) -> Configuration {
        Configuration::new()
    }

    /// Samples produced per input sample. Must be exact for live loading.
    fn multiplier(&self) -> f64 {
        1.0
    }

    /// Whether the operation runs on `split`. Operations that do not apply act
    /// as the identity with multiplier 1.
    fn applies_to(&self, _split: Split) -> bool {
        true
    }

    fn process(&self, sample: Sample) -> Result<Vec<Sample>>;
}

/// Final per-sample step of a pipeline, e.g. decoding into an array.
pub trait Output: Transform<Sample, Sample> {
    fn name(&self) -> &str;

    fn configuration(&self) -> Configuration {
        Configuration::new()
    }

    /// Receives the input's dataset meta before the first sample is produced.
    fn set_meta(&self, _meta: &Meta) {}
}

/// Output that leaves samples as they are.
#[derive(Debug, Default)]
pub struct IdentityOutput;

impl Transform<Sample, Sample> for IdentityOutput {
    fn apply(&self, sample: Sample) -> Result<Sample> {
        Ok(sample)
    }
}

impl Output for IdentityOutput {
    fn name(&self) -> &str {
        "identity"
    }
}
