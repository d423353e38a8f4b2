use anyhow::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::warn;

use crate::sample::{Meta, Sample, Split};

/// Plugin configuration, ordered by key so it renders deterministically.
pub type Configuration = BTreeMap<String, Value>;

/// Produces the raw samples of a dataset, split by split.
///
/// Reads must be bracketed by `begin_read_samples` / `end_read_samples`.
/// Loaders implement this trait too, so a caching loader can act as the
/// input of another loader.
pub trait Source: Send + Sync {
    /// Stable identity of the implementation, part of the cache key.
    fn name(&self) -> &str;

    /// Options the source was built with, part of the cache key.
    fn configuration(&self) -> Configuration {
        Configuration::new()
    }

    fn num_samples(&self, split: Split) -> Result<usize>;

    /// Returns `n` consecutive samples of `split` starting at `index`.
    fn read_samples(&self, split: Split, index: usize, n: usize) -> Result<Vec<Sample>>;

    /// Like `read_samples`, but may return a cheaper undecoded form that
    /// `recover_raw_sample` turns back into a regular sample.
    fn read_raw_samples(&self, split: Split, index: usize, n: usize) -> Result<Vec<Sample>> {
        self.read_samples(split, index, n)
    }

    fn recover_raw_sample(&self, sample: Sample) -> Result<Sample> {
        Ok(sample)
    }

    /// Digest of a pipeline state string, used to name cache files.
    fn hash(&self, state: &str) -> String {
        hex_digest(state.as_bytes())
    }

    fn begin_read_samples(&self) -> Result<()> {
        Ok(())
    }

    fn end_read_samples(&self) -> Result<()> {
        Ok(())
    }

    /// Dataset-level side information, e.g. the list of class labels.
    fn meta(&self) -> Meta {
        Meta::new()
    }
}

/// An open `begin_read_samples` / `end_read_samples` bracket.
///
/// Dropping an unfinished session still ends it, so an early `?` return
/// does not leave the source's session open.
pub(crate) struct ReadSession<'a, S: Source + ?Sized> {
    source: &'a S,
    open: bool,
}

impl<'a, S: Source + ?Sized> ReadSession<'a, S> {
    pub(crate) fn begin(source: &'a S) -> Result<Self> {
        source.begin_read_samples()?;
        Ok(Self { source, open: true })
    }

    /// Ends the session, reporting the source's error.
    pub(crate) fn end(mut self) -> Result<()> {
        self.open = false;
        self.source.end_read_samples()
    }
}

impl<S: Source + ?Sized> Drop for ReadSession<'_, S> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.source.end_read_samples() {
                warn!(source = self.source.name(), %err, "failed to end read session");
            }
        }
    }
}

/// Renders a configuration the same way for every run: `name` followed by the
/// key-sorted options as JSON.
pub fn fingerprint(name: &str, configuration: &Configuration) -> String {
    // A BTreeMap of JSON values always serializes.
    let options = serde_json::to_string(configuration).unwrap_or_default();
    format!("{}{}", name, options)
}

pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
