use anyhow::{bail, ensure, Context, Result};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::EntryType;
use crate::error::PipelineError;

const HEADER_LEN: u64 = 8;

/// Trailer appended to the file on close, serialized as a JSON array
/// `[index, item_meta, meta, info]`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Trailer(Vec<(u64, u64)>, Vec<Value>, Value, Vec<EntryType>);

enum Mode {
    Write { out: BufWriter<File>, pos: u64 },
    Read { mmap: Mmap },
    Closed,
}

/// Append-only binary cache file.
///
/// A `FileCache` is either a write session (`create`) or a read session
/// (`open`). Reads slice straight into the memory-mapped file.
pub struct FileCache {
    path: PathBuf,
    mode: Mode,
    index: Vec<(u64, u64)>,
    item_meta: Vec<Value>,
    meta: Value,
    info: Vec<EntryType>,
}

impl FileCache {
    /// Creates (or truncates) `path` and starts a write session.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("Failed to create cache file {}", path.display()))?;
        let mut out = BufWriter::new(file);
        out.write_all(&0u64.to_le_bytes())?;

        Ok(Self {
            path,
            mode: Mode::Write {
                out,
                pos: HEADER_LEN,
            },
            index: Vec::new(),
            item_meta: Vec::new(),
            meta: Value::Null,
            info: Vec::new(),
        })
    }

    /// Opens a closed cache file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("Failed to open cache file {}", path.display()))?;
        // SAFETY: cache files are immutable once closed.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to mmap cache file {}", path.display()))?;

        let invalid = || PipelineError::InvalidCacheFile { path: path.clone() };
        let header: [u8; 8] = mmap
            .get(..HEADER_LEN as usize)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(invalid)?;
        let trailer_pos = u64::from_le_bytes(header) as usize;
        if trailer_pos == 0 || trailer_pos > mmap.len() {
            return Err(invalid().into());
        }

        let Trailer(index, item_meta, meta, info) = serde_json::from_slice(&mmap[trailer_pos..])
            .with_context(|| format!("Corrupt trailer in cache file {}", path.display()))?;
        ensure!(
            index.len() == item_meta.len()
                && index
                    .iter()
                    .all(|&(start, end)| start <= end && end as usize <= trailer_pos),
            invalid()
        );

        Ok(Self {
            path,
            mode: Mode::Read { mmap },
            index,
            item_meta,
            meta,
            info,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Cache-level metadata stored in the trailer.
    pub fn meta(&self) -> &Value {
        &self.meta
    }

    pub fn set_meta(&mut self, meta: Value) {
        self.meta = meta;
    }

    pub(super) fn info(&self) -> &[EntryType] {
        &self.info
    }

    /// Appends one entry. Only valid in a write session.
    pub fn write(&mut self, data: &[u8], meta: Value) -> Result<()> {
        let Mode::Write { out, pos } = &mut self.mode else {
            bail!("Cache {} is not open for writing", self.path.display());
        };
        out.write_all(data)?;
        let start = *pos;
        *pos += data.len() as u64;
        self.index.push((start, *pos));
        self.item_meta.push(meta);
        Ok(())
    }

    pub(super) fn write_typed(&mut self, data: &[u8], meta: Value, entry: EntryType) -> Result<()> {
        self.write(data, meta)?;
        self.info.push(entry);
        Ok(())
    }

    /// Returns `n` consecutive entries starting at `index`, borrowing into the
    /// mapped file.
    pub fn read(&self, index: usize, n: usize) -> Result<Vec<(&[u8], &Value)>> {
        let Mode::Read { mmap } = &self.mode else {
            bail!("Cache {} is not open for reading", self.path.display());
        };
        let end = index.saturating_add(n);
        ensure!(
            end <= self.index.len(),
            PipelineError::IndexOutOfRange {
                index: end as isize - 1,
                len: self.index.len(),
            }
        );
        self.index[index..end]
            .iter()
            .zip(&self.item_meta[index..end])
            .map(|(&(start, stop), meta)| {
                let (start, stop) = (start as usize, stop as usize);
                ensure!(
                    start <= stop && stop <= mmap.len(),
                    PipelineError::InvalidCacheFile {
                        path: self.path.clone()
                    }
                );
                Ok((&mmap[start..stop], meta))
            })
            .collect()
    }

    /// Ends the session. For a write session this appends the trailer and
    /// records its position in the header. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.mode, Mode::Closed) {
            Mode::Write { mut out, pos } => {
                let trailer = Trailer(
                    std::mem::take(&mut self.index),
                    std::mem::take(&mut self.item_meta),
                    self.meta.take(),
                    std::mem::take(&mut self.info),
                );
                serde_json::to_writer(&mut out, &trailer)?;
                out.seek(SeekFrom::Start(0))?;
                out.write_all(&pos.to_le_bytes())?;
                out.flush()
                    .with_context(|| format!("Failed to flush cache file {}", self.path.display()))?;
            }
            Mode::Read { .. } | Mode::Closed => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_back_written_entries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("entries.cache");

        let mut cache = FileCache::create(&path)?;
        cache.write(b"hello", json!({"i": 0}))?;
        cache.write(b"", json!(null))?;
        cache.write(b"world!", json!("two"))?;
        cache.set_meta(json!({"labels": ["a", "b"]}));
        cache.close()?;

        let cache = FileCache::open(&path)?;
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.meta(), &json!({"labels": ["a", "b"]}));
        let entries = cache.read(0, 3)?;
        assert_eq!(entries[0], (&b"hello"[..], &json!({"i": 0})));
        assert_eq!(entries[1].0, b"");
        assert_eq!(entries[2], (&b"world!"[..], &json!("two")));
        assert!(cache.read(2, 2).is_err());
        Ok(())
    }

    #[test]
    fn header_points_at_trailer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("header.cache");

        let mut cache = FileCache::create(&path)?;
        cache.write(b"abc", json!(1))?;
        cache.close()?;

        let bytes = std::fs::read(&path)?;
        let pos = u64::from_le_bytes(bytes[..8].try_into()?);
        assert_eq!(pos, 8 + 3);
        assert_eq!(&bytes[8..11], b"abc");
        let trailer: Value = serde_json::from_slice(&bytes[pos as usize..])?;
        assert_eq!(trailer, json!([[[8, 11]], [1], null, []]));
        Ok(())
    }

    #[test]
    fn unclosed_file_is_invalid() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("unclosed.cache");

        let mut cache = FileCache::create(&path)?;
        cache.write(b"abc", json!(1))?;
        drop(cache);

        let err = FileCache::open(&path).err().unwrap();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::InvalidCacheFile { path })
        );
        assert!(err.to_string().starts_with("Invalid cache file"));
        Ok(())
    }

    #[test]
    fn inverted_entry_bounds_are_invalid() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("inverted.cache");

        let mut bytes = 11u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        bytes.extend_from_slice(br#"[[[10, 9]], [1], null, []]"#);
        std::fs::write(&path, &bytes)?;

        let err = FileCache::open(&path).err().unwrap();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::InvalidCacheFile { path })
        );
        Ok(())
    }

    #[test]
    fn modes_are_exclusive() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("modes.cache");

        let mut cache = FileCache::create(&path)?;
        assert!(cache.read(0, 0).is_err());
        cache.close()?;
        cache.close()?;

        let mut cache = FileCache::open(&path)?;
        assert!(cache.write(b"x", json!(null)).is_err());
        assert!(cache.read(0, 0)?.is_empty());
        Ok(())
    }
}
