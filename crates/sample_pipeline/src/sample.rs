use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::array::NdArray;
use crate::error::suggest;

/// Per-sample side information. Keys are kept sorted so the map serialises
/// deterministically.
pub type Meta = serde_json::Map<String, serde_json::Value>;

/// One of the three partitions every dataset is divided into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    /// All splits in population order.
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Val),
            "test" => Ok(Split::Test),
            other => Err(anyhow!(
                "Invalid split '{}'{}",
                other,
                suggest(Split::ALL.iter().map(Split::as_str), other)
                    .map(|s| format!(" (did you mean '{}'?)", s))
                    .unwrap_or_default()
            )),
        }
    }
}

/// An opaque sample payload.
///
/// The variant decides how the payload is stored in a serialized cache:
/// raw bytes are written as-is, arrays in `.npy` format and everything else
/// as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Array(NdArray),
    Object(serde_json::Value),
}

impl Payload {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Payload::Object(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Payload::Object(v) => v.as_f64(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Payload::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl From<i64> for Payload {
    fn from(v: i64) -> Self {
        Payload::Object(v.into())
    }
}

impl From<i32> for Payload {
    fn from(v: i32) -> Self {
        Payload::Object(v.into())
    }
}

impl From<usize> for Payload {
    fn from(v: usize) -> Self {
        Payload::Object(v.into())
    }
}

impl From<f64> for Payload {
    fn from(v: f64) -> Self {
        Payload::Object(v.into())
    }
}

impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Payload::Object(v.into())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::Bytes(v)
    }
}

impl From<NdArray> for Payload {
    fn from(v: NdArray) -> Self {
        Payload::Array(v)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Payload::Object(v)
    }
}

/// Deterministic random generator owned by a single sample.
///
/// Seeded from `base_seed + index` so the same logical input always starts
/// from the same state. Stochastic operations draw from it through `RngCore`.
/// Serialization keeps only the seed; a deserialized generator restarts from
/// its seeded state.
#[derive(Debug, Clone)]
pub struct SampleRng {
    seed: u64,
    rng: StdRng,
}

impl SampleRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generator for the item at `index` of a source seeded with `base_seed`.
    pub fn for_index(base_seed: u64, index: usize) -> Self {
        Self::new(base_seed.wrapping_add(index as u64))
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl PartialEq for SampleRng {
    fn eq(&self, other: &Self) -> bool {
        self.seed == other.seed
    }
}

impl RngCore for SampleRng {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.rng.fill_bytes(dst)
    }
}

impl Serialize for SampleRng {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.seed.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SampleRng {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        u64::deserialize(deserializer).map(SampleRng::new)
    }
}

/// The atomic record flowing through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub x: Payload,
    pub y: Payload,
    pub meta: Meta,
    pub rng: SampleRng,
}

impl Sample {
    pub fn new(x: impl Into<Payload>, y: impl Into<Payload>, rng: SampleRng) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            meta: Meta::new(),
            rng,
        }
    }

    /// Adds or overwrites a meta entry and returns the sample.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Returns a meta entry by key.
    pub fn meta_value(&self, key: &str) -> Result<&serde_json::Value> {
        self.meta
            .get(key)
            .ok_or_else(|| anyhow!("Meta key {} not found", key))
    }
}
