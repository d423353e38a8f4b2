//! src/cache/mod.rs
//!
//! Positional storage for encoded `(data, meta)` entries.
//!
//! - `memory`: a plain in-memory vector of entries
//! - `file`: an append-only binary file, memory-mapped for reading
//! - `serialized`: `file` plus payload (de)serialization and LZ4 compression
//!
//! # File layout
//!
//! ```text
//! offset 0        8                                   trailer_pos
//!        ┌────────┬───────────────────────────────────┬───────────────────────────┐
//!        │ u64 LE │ payload bytes, appended in order  │ (index, item_meta, meta,  │
//!        │ trailer│                                   │  info) as JSON            │
//!        │ _pos   │                                   │                           │
//!        └────────┴───────────────────────────────────┴───────────────────────────┘
//! ```
//!
//! The header is zero while a write session is open. A file whose header is
//! still zero was never closed and is rejected on open.

mod file;
mod memory;
mod serialized;

pub use file::FileCache;
pub use memory::MemoryCache;
pub use serialized::{CacheData, SerializedFileCache};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Storage for `(data, meta)` entries with positional random access.
///
/// Writes are sequential appends. `read(index, n)` returns `n` consecutive
/// entries starting at `index`.
pub trait Cache {
    type Data;
    type Meta;

    fn write(&mut self, data: Self::Data, meta: Self::Meta) -> Result<()>;

    fn read(&self, index: usize, n: usize) -> Result<Vec<(Self::Data, Self::Meta)>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encoding of one serialized payload part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TypeTag {
    Bytes = 0,
    Numpy = 1,
    Pickle = 2,
}

impl From<TypeTag> for u8 {
    fn from(tag: TypeTag) -> u8 {
        tag as u8
    }
}

impl TryFrom<u8> for TypeTag {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            0 => Ok(TypeTag::Bytes),
            1 => Ok(TypeTag::Numpy),
            2 => Ok(TypeTag::Pickle),
            other => Err(format!("unknown payload type tag {}", other)),
        }
    }
}

/// Per-entry type information: a single tag, or a pair of tags for an
/// `(x, y)` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryType {
    Single(TypeTag),
    Pair(TypeTag, TypeTag),
}
