use anyhow::{ensure, Context, Result};
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use serde_json::Value;
use std::io::{Read, Write};
use std::path::Path;

use super::{Cache, EntryType, FileCache, TypeTag};
use crate::array::NdArray;
use crate::sample::Payload;

/// What a serialized cache stores per entry: one payload, or an `(x, y)` pair.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheData {
    Single(Payload),
    Pair(Payload, Payload),
}

/// A [`FileCache`] that encodes [`CacheData`] on write and decodes it on read.
///
/// Bytes are stored as-is, arrays as `.npy`, and any other payload as JSON.
/// When `compress` is set each encoded part is wrapped in an LZ4 frame. The
/// flag is not recorded in the file, so readers must open with the same value
/// the writer used.
pub struct SerializedFileCache {
    file: FileCache,
    compress: bool,
}

impl SerializedFileCache {
    pub fn create(path: impl AsRef<Path>, compress: bool) -> Result<Self> {
        Ok(Self {
            file: FileCache::create(path)?,
            compress,
        })
    }

    pub fn open(path: impl AsRef<Path>, compress: bool) -> Result<Self> {
        Ok(Self {
            file: FileCache::open(path)?,
            compress,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn meta(&self) -> &Value {
        self.file.meta()
    }

    pub fn set_meta(&mut self, meta: Value) {
        self.file.set_meta(meta)
    }

    pub fn close(&mut self) -> Result<()> {
        self.file.close()
    }

    fn encode(&self, payload: &Payload) -> Result<(TypeTag, Vec<u8>)> {
        let (tag, buf) = match payload {
            Payload::Bytes(b) => (TypeTag::Bytes, b.clone()),
            Payload::Array(a) => (TypeTag::Numpy, a.to_npy()?),
            Payload::Object(v) => (TypeTag::Pickle, serde_json::to_vec(v)?),
        };
        if !self.compress {
            return Ok((tag, buf));
        }
        let mut encoder = FrameEncoder::new(Vec::with_capacity(buf.len() / 2));
        encoder.write_all(&buf)?;
        Ok((tag, encoder.finish()?))
    }

    fn decode(&self, buf: &[u8], tag: TypeTag) -> Result<Payload> {
        let decompressed;
        let buf = if self.compress {
            let mut out = Vec::new();
            FrameDecoder::new(buf)
                .read_to_end(&mut out)
                .context("Failed to decompress cache entry")?;
            decompressed = out;
            decompressed.as_slice()
        } else {
            buf
        };
        Ok(match tag {
            TypeTag::Bytes => Payload::Bytes(buf.to_vec()),
            TypeTag::Numpy => Payload::Array(NdArray::from_npy(buf)?),
            TypeTag::Pickle => Payload::Object(serde_json::from_slice(buf)?),
        })
    }
}

impl Cache for SerializedFileCache {
    type Data = CacheData;
    type Meta = Value;

    fn write(&mut self, data: CacheData, meta: Value) -> Result<()> {
        match data {
            CacheData::Single(payload) => {
                let (tag, buf) = self.encode(&payload)?;
                self.file.write_typed(&buf, meta, EntryType::Single(tag))
            }
            CacheData::Pair(x, y) => {
                let (tag_x, buf_x) = self.encode(&x)?;
                let (tag_y, buf_y) = self.encode(&y)?;
                let mut buf = Vec::with_capacity(8 + buf_x.len() + buf_y.len());
                buf.extend_from_slice(&(buf_x.len() as u64).to_le_bytes());
                buf.extend_from_slice(&buf_x);
                buf.extend_from_slice(&buf_y);
                self.file.write_typed(&buf, meta, EntryType::Pair(tag_x, tag_y))
            }
        }
    }

    fn read(&self, index: usize, n: usize) -> Result<Vec<(CacheData, Value)>> {
        let entries = self.file.read(index, n)?;
        let info = self.file.info();
        ensure!(
            info.len() == self.file.len(),
            "Cache {} has no type information for its entries",
            self.path().display()
        );

        entries
            .into_iter()
            .zip(&info[index..index + n])
            .map(|((buf, meta), entry)| -> Result<(CacheData, Value)> {
                let data = match *entry {
                    EntryType::Single(tag) => CacheData::Single(self.decode(buf, tag)?),
                    EntryType::Pair(tag_x, tag_y) => {
                        ensure!(buf.len() >= 8, "Truncated pair entry");
                        let (len, rest) = buf.split_at(8);
                        let len = u64::from_le_bytes(len.try_into()?) as usize;
                        ensure!(rest.len() >= len, "Truncated pair entry");
                        let (x, y) = rest.split_at(len);
                        CacheData::Pair(self.decode(x, tag_x)?, self.decode(y, tag_y)?)
                    }
                };
                Ok((data, meta.clone()))
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.file.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_entries() -> Result<Vec<(CacheData, Value)>> {
        let array = NdArray::from_vec(vec![2, 2], vec![1.5f32, -2.0, 3.25, 0.0])?;
        Ok(vec![
            (CacheData::Single(Payload::Bytes(b"\x89PNG raw".to_vec())), json!({"i": 0})),
            (CacheData::Single(array.clone().into()), json!({"i": 1})),
            (CacheData::Single(json!({"label": "cat", "score": 0.5}).into()), json!(null)),
            (
                CacheData::Pair(array.into(), Payload::from(7)),
                json!({"meta": 3}),
            ),
            (
                CacheData::Pair(Payload::Bytes(Vec::new()), Payload::from("dog")),
                json!([1, 2]),
            ),
        ])
    }

    fn round_trip(compress: bool) -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("serialized.cache");
        let entries = sample_entries()?;

        let mut cache = SerializedFileCache::create(&path, compress)?;
        for (data, meta) in entries.clone() {
            cache.write(data, meta)?;
        }
        cache.set_meta(json!({"labels": ["cat", "dog"]}));
        cache.close()?;

        let cache = SerializedFileCache::open(&path, compress)?;
        assert_eq!(cache.len(), entries.len());
        assert_eq!(cache.meta(), &json!({"labels": ["cat", "dog"]}));
        assert_eq!(cache.read(0, entries.len())?, entries);
        assert_eq!(cache.read(3, 1)?, entries[3..4].to_vec());
        Ok(())
    }

    #[test]
    fn round_trip_uncompressed() -> Result<()> {
        round_trip(false)
    }

    #[test]
    fn round_trip_compressed() -> Result<()> {
        round_trip(true)
    }

    #[test]
    fn pair_layout_prefixes_first_part_length() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pair.cache");

        let mut cache = SerializedFileCache::create(&path, false)?;
        cache.write(
            CacheData::Pair(Payload::Bytes(b"xyz".to_vec()), Payload::Bytes(b"ab".to_vec())),
            json!(null),
        )?;
        cache.close()?;

        let bytes = std::fs::read(&path)?;
        assert_eq!(u64::from_le_bytes(bytes[8..16].try_into()?), 3);
        assert_eq!(&bytes[16..21], b"xyzab");

        let file = FileCache::open(&path)?;
        assert_eq!(file.info(), &[EntryType::Pair(TypeTag::Bytes, TypeTag::Bytes)]);
        Ok(())
    }
}
