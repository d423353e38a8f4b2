use anyhow::Result;

use super::Cache;
use crate::error::PipelineError;

/// Keeps entries in a vector. Reads clone the requested range.
#[derive(Debug, Clone)]
pub struct MemoryCache<D, M> {
    entries: Vec<(D, M)>,
}

impl<D, M> Default for MemoryCache<D, M> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<D, M> MemoryCache<D, M> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<D: Clone, M: Clone> Cache for MemoryCache<D, M> {
    type Data = D;
    type Meta = M;

    fn write(&mut self, data: D, meta: M) -> Result<()> {
        self.entries.push((data, meta));
        Ok(())
    }

    fn read(&self, index: usize, n: usize) -> Result<Vec<(D, M)>> {
        let end = index.saturating_add(n);
        let entries = self
            .entries
            .get(index..end)
            .ok_or(PipelineError::IndexOutOfRange {
                index: end as isize - 1,
                len: self.entries.len(),
            })?;
        Ok(entries.to_vec())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
