//! src/config.rs
//!
//! Pipeline configuration
//!
//! `PipelineConfig` describes a complete pipeline (input, preprocessing,
//! output and caching) and is usually read from JSON:
//! ```ignore
//! let config = PipelineConfig::from_json(r#"{
//!     "cache": "mem",
//!     "input": {"type": "range", "train": 100},
//!     "preprocess": ["augment", {"op": "scale", "factor": 2.0}]
//! }"#)?;
//! ```
//!
//! `DataOptions` carries the same runtime settings for pipelines assembled in
//! code:
//! ```ignore
//! let options = DataOptions::builder()
//!     .cache(CacheMode::Mem)
//!     .random_seed(42)
//!     .build();
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::display::Display;
use crate::error::{suggest, PipelineError};
use crate::registry::PluginArgs;
use crate::views::DEFAULT_RANDOM_SEED;

pub const DEFAULT_CACHE_DIR: &str = ".cache";

/// Where a cache stage keeps its samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Memory,
    Disk,
}

/// Which stage of the pipeline is cached, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CacheMode {
    /// Input samples in memory, output computed live
    MemIn,
    /// Input samples on disk, output computed live
    DiskIn,
    /// Output samples in memory
    Mem,
    /// Output samples on disk
    Disk,
    /// Currently the same as `Disk`
    #[default]
    Auto,
    /// Nothing cached
    None,
}

impl CacheMode {
    const NAMES: [&'static str; 6] = ["mem-in", "disk-in", "mem", "disk", "*auto*", "none"];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::MemIn => "mem-in",
            CacheMode::DiskIn => "disk-in",
            CacheMode::Mem => "mem",
            CacheMode::Disk => "disk",
            CacheMode::Auto => "*auto*",
            CacheMode::None => "none",
        }
    }

    /// Cache stores for the input and for the output.
    pub fn stores(&self) -> (Option<Store>, Option<Store>) {
        match self {
            CacheMode::MemIn => (Some(Store::Memory), None),
            CacheMode::DiskIn => (Some(Store::Disk), None),
            CacheMode::Mem => (None, Some(Store::Memory)),
            CacheMode::Disk | CacheMode::Auto => (None, Some(Store::Disk)),
            CacheMode::None => (None, None),
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> std::result::Result<Self, PipelineError> {
        match s {
            "mem-in" => Ok(CacheMode::MemIn),
            "disk-in" => Ok(CacheMode::DiskIn),
            "mem" => Ok(CacheMode::Mem),
            "disk" => Ok(CacheMode::Disk),
            "*auto*" => Ok(CacheMode::Auto),
            "none" => Ok(CacheMode::None),
            other => Err(PipelineError::InvalidCacheMode {
                value: other.to_string(),
                suggestion: suggest(CacheMode::NAMES, other),
            }),
        }
    }
}

impl TryFrom<String> for CacheMode {
    type Error = PipelineError;

    fn try_from(value: String) -> std::result::Result<Self, PipelineError> {
        value.parse()
    }
}

impl From<CacheMode> for String {
    fn from(mode: CacheMode) -> Self {
        mode.as_str().to_string()
    }
}

/// A named plugin with its options, e.g. `{"type": "range", "train": 100}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    #[serde(rename = "type")]
    pub name: String,
    #[serde(flatten)]
    pub args: PluginArgs,
}

/// One preprocessing step: a bare operation name or `{"op": name, ...options}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawOperationSpec")]
pub struct OperationSpec {
    pub op: String,
    #[serde(flatten)]
    pub args: PluginArgs,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOperationSpec {
    Name(String),
    Full {
        op: String,
        #[serde(flatten)]
        args: PluginArgs,
    },
}

impl From<RawOperationSpec> for OperationSpec {
    fn from(raw: RawOperationSpec) -> Self {
        match raw {
            RawOperationSpec::Name(op) => OperationSpec {
                op,
                args: PluginArgs::new(),
            },
            RawOperationSpec::Full { op, args } => OperationSpec { op, args },
        }
    }
}

fn default_random_seed() -> u64 {
    DEFAULT_RANDOM_SEED
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

/// A complete pipeline description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub cache: CacheMode,
    pub input: PluginSpec,
    #[serde(default)]
    pub preprocess: Vec<OperationSpec>,
    /// Defaults to an output plugin named like the input, if one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PluginSpec>,
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid pipeline configuration")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline configuration {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("In {}", path.display()))
    }

    /// Runtime options carried by this configuration.
    pub fn data_options(&self) -> DataOptions {
        DataOptions::builder()
            .random_seed(self.random_seed)
            .cache_dir(&self.cache_dir)
            .cache(self.cache)
            .build()
    }
}

/// Runtime settings of a `Data` pipeline.
#[derive(Clone)]
pub struct DataOptions {
    /// Directory holding file caches
    pub cache_dir: PathBuf,
    pub cache: CacheMode,
    /// Seed for shuffling in views
    pub random_seed: u64,
    /// Receives population banners and progress; `None` stays silent
    pub display: Option<Arc<Display>>,
    /// Aborts disk cache population once set
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl Default for DataOptions {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            cache: CacheMode::Auto,
            random_seed: DEFAULT_RANDOM_SEED,
            display: None,
            interrupt: None,
        }
    }
}

impl DataOptions {
    pub fn builder() -> DataOptionsBuilder {
        DataOptionsBuilder::default()
    }
}

/// Builder for DataOptions with method chaining
#[derive(Default)]
pub struct DataOptionsBuilder {
    options: DataOptions,
}

impl DataOptionsBuilder {
    pub fn cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.options.cache_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn cache(mut self, mode: CacheMode) -> Self {
        self.options.cache = mode;
        self
    }

    pub fn random_seed(mut self, seed: u64) -> Self {
        self.options.random_seed = seed;
        self
    }

    /// Report population progress on `display`
    pub fn display(mut self, display: Arc<Display>) -> Self {
        self.options.display = Some(display);
        self
    }

    pub fn interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.options.interrupt = Some(flag);
        self
    }

    pub fn build(self) -> DataOptions {
        self.options
    }
}
