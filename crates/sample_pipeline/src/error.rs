use std::path::PathBuf;
use thiserror::Error;

use crate::sample::Split;

/// Typed failure conditions raised by the pipeline.
///
/// Fallible functions return `anyhow::Result`; these variants travel inside the
/// `anyhow::Error` and can be recovered with `err.downcast_ref::<PipelineError>()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Invalid cache file: {}", path.display())]
    InvalidCacheFile { path: PathBuf },

    #[error("list index out of range: {index} (length {len})")]
    IndexOutOfRange { index: isize, len: usize },

    #[error("{kind} plugin not found: {name}{}", did_you_mean(suggestion))]
    UnknownPlugin {
        kind: &'static str,
        name: String,
        suggestion: Option<String>,
    },

    #[error("Invalid cache mode: {value}{}", did_you_mean(suggestion))]
    InvalidCacheMode {
        value: String,
        suggestion: Option<String>,
    },

    #[error("Invalid arguments for plugin {name}: {reason}")]
    InvalidPluginArgs { name: String, reason: String },

    #[error("Loader has not been populated; call begin_read_samples() first")]
    NotPopulated,

    #[error("Multiplier {multiplier} for split {split} is not a whole number >= 1")]
    NonIntegralMultiplier { split: Split, multiplier: f64 },

    #[error(
        "Operations produced {produced} samples from {raw} input samples on split {split}, \
         expected {expected}"
    )]
    MultiplierMismatch {
        split: Split,
        raw: usize,
        produced: usize,
        expected: usize,
    },

    #[error("Preprocessing operations require an output stage")]
    MissingOutputStage,

    #[error("Cache population was interrupted")]
    Interrupted,

    #[error("Pump for split {split} stopped producing samples")]
    PumpExhausted { split: Split },

    #[error("No pump {serial} is installed for split {split}")]
    PumpNotInstalled { split: Split, serial: u64 },
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{}'?)", s),
        None => String::new(),
    }
}

/// Returns the candidate closest to `value` by edit distance, if it is close enough
/// to be a plausible typo.
pub fn suggest<'a>(candidates: impl IntoIterator<Item = &'a str>, value: &str) -> Option<String> {
    candidates
        .into_iter()
        .map(|c| (levenshtein(c, value), c))
        .filter(|(d, c)| *d <= (c.len().max(value.len()) / 3).max(1))
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c.to_string())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
