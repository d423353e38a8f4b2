pub mod array;
pub mod cache;
pub mod config;
pub mod data;
pub mod display;
pub mod error;
pub mod loader;
pub mod operation;
pub mod pipeline;
pub mod registry;
pub mod sample;
pub mod sampler;
pub mod source;
pub mod transform;
pub mod views;

pub use array::{DType, NdArray};
pub use config::{CacheMode, DataOptions, PipelineConfig};
pub use data::Data;
pub use display::Display;
pub use error::PipelineError;
pub use loader::{
    FileCachedLoader, LiveLoader, Loader, MemoryCachedLoader, Progress, ProgressCallback, PumpId,
};
pub use operation::{IdentityOutput, Operation, Output};
pub use pipeline::Pipeline;
pub use registry::{PluginArgs, PluginArgsExt, PluginRegistry};
pub use sample::{Meta, Payload, Sample, SampleRng, Split};
pub use source::{Configuration, Source};
pub use transform::{FnTransform, Transform};
pub use views::{Batch, BatchOptions, BatchView, IteratorView, Layout, ListView, Record, ViewOptions};
