//! Stock sources, operations and outputs for `sample_pipeline`.
//!
//! | kind      | name        | arguments                                         |
//! |-----------|-------------|---------------------------------------------------|
//! | source    | `range`     | `train`, `val`, `test`, `classes`, `seed`         |
//! | source    | `directory` | `path`, `val-split`, `test-split`, `seed`         |
//! | operation | `augment`   | `variants`, `amount`, `apply`                     |
//! | operation | `scale`     | `factor`, `apply`                                 |
//! | output    | `to-array`  | `dtype`                                           |
mod operations;
mod outputs;
mod sources;

pub use operations::{Augment, Scale};
pub use outputs::ToArray;
pub use sources::{DirectorySource, RangeSource};

use sample_pipeline::PluginRegistry;

/// Adds every plugin of this crate to `registry`.
pub fn register(registry: &mut PluginRegistry) {
    registry.register_source(RangeSource::NAME, RangeSource::create);
    registry.register_source(DirectorySource::NAME, DirectorySource::create);
    registry.register_operation(Augment::NAME, Augment::create);
    registry.register_operation(Scale::NAME, Scale::create);
    registry.register_output(ToArray::NAME, ToArray::create);
}

/// A registry with the built-in identity output and every plugin of this crate.
pub fn registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    register(&mut registry);
    registry
}
