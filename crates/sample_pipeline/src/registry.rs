//! src/registry.rs
//!
//! Named factories for sources, operations and outputs.
//!
//! A registry is filled once at start-up and then passed by reference to
//! whatever builds pipelines from configuration:
//! ```ignore
//! let mut registry = PluginRegistry::new();
//! registry.register_source("range", RangeSource::create);
//! let source = registry.create_source("range", &args)?;
//! ```

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{suggest, PipelineError};
use crate::operation::{IdentityOutput, Operation, Output};
use crate::source::{Configuration, Source};

/// Options a plugin is created with.
pub type PluginArgs = Configuration;

pub type SourceFactory = fn(&PluginArgs) -> Result<Arc<dyn Source>>;
pub type OperationFactory = fn(&PluginArgs) -> Result<Arc<dyn Operation>>;
pub type OutputFactory = fn(&PluginArgs) -> Result<Arc<dyn Output>>;

#[derive(Default, Clone)]
pub struct PluginRegistry {
    sources: BTreeMap<String, SourceFactory>,
    operations: BTreeMap<String, OperationFactory>,
    outputs: BTreeMap<String, OutputFactory>,
}

impl PluginRegistry {
    /// An empty registry apart from the `identity` output.
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register_output("identity", identity_output);
        registry
    }

    pub fn register_source(&mut self, name: &str, factory: SourceFactory) {
        self.sources.insert(name.to_string(), factory);
    }

    pub fn register_operation(&mut self, name: &str, factory: OperationFactory) {
        self.operations.insert(name.to_string(), factory);
    }

    pub fn register_output(&mut self, name: &str, factory: OutputFactory) {
        self.outputs.insert(name.to_string(), factory);
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.contains_key(name)
    }

    pub fn create_source(&self, name: &str, args: &PluginArgs) -> Result<Arc<dyn Source>> {
        let factory = lookup(&self.sources, "source", name)?;
        factory(args).with_context(|| format!("Failed to create source '{}'", name))
    }

    pub fn create_operation(&self, name: &str, args: &PluginArgs) -> Result<Arc<dyn Operation>> {
        let factory = lookup(&self.operations, "operation", name)?;
        factory(args).with_context(|| format!("Failed to create operation '{}'", name))
    }

    pub fn create_output(&self, name: &str, args: &PluginArgs) -> Result<Arc<dyn Output>> {
        let factory = lookup(&self.outputs, "output", name)?;
        factory(args).with_context(|| format!("Failed to create output '{}'", name))
    }
}

fn identity_output(_args: &PluginArgs) -> Result<Arc<dyn Output>> {
    Ok(Arc::new(IdentityOutput))
}

fn lookup<'a, F>(
    factories: &'a BTreeMap<String, F>,
    kind: &'static str,
    name: &str,
) -> Result<&'a F> {
    factories.get(name).ok_or_else(|| {
        PipelineError::UnknownPlugin {
            kind,
            name: name.to_string(),
            suggestion: suggest(factories.keys().map(String::as_str), name),
        }
        .into()
    })
}

/// Typed accessors for plugin options. Failures are reported as
/// [`PipelineError::InvalidPluginArgs`].
pub trait PluginArgsExt {
    fn get_u64(&self, plugin: &str, key: &str, default: u64) -> Result<u64>;
    fn get_f64(&self, plugin: &str, key: &str, default: f64) -> Result<f64>;
    fn get_str<'a>(&'a self, plugin: &str, key: &str) -> Result<Option<&'a str>>;
    fn get_str_list(&self, plugin: &str, key: &str) -> Result<Option<Vec<String>>>;
}

fn invalid(plugin: &str, reason: String) -> anyhow::Error {
    PipelineError::InvalidPluginArgs {
        name: plugin.to_string(),
        reason,
    }
    .into()
}

impl PluginArgsExt for PluginArgs {
    fn get_u64(&self, plugin: &str, key: &str, default: u64) -> Result<u64> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value
                .as_u64()
                .ok_or_else(|| invalid(plugin, format!("'{}' must be a non-negative integer, got {}", key, value))),
        }
    }

    fn get_f64(&self, plugin: &str, key: &str, default: f64) -> Result<f64> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| invalid(plugin, format!("'{}' must be a number, got {}", key, value))),
        }
    }

    fn get_str<'a>(&'a self, plugin: &str, key: &str) -> Result<Option<&'a str>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(value) => Err(invalid(plugin, format!("'{}' must be a string, got {}", key, value))),
        }
    }

    fn get_str_list(&self, plugin: &str, key: &str) -> Result<Option<Vec<String>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid(plugin, format!("'{}' must list strings, got {}", key, item)))
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(value) => Err(invalid(
                plugin,
                format!("'{}' must be a string or a list of strings, got {}", key, value),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Sample, SampleRng, Split};
    use serde_json::json;

    struct Fixed(usize);

    impl Source for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn num_samples(&self, _split: Split) -> Result<usize> {
            Ok(self.0)
        }

        fn read_samples(&self, _split: Split, index: usize, n: usize) -> Result<Vec<Sample>> {
            Ok((index..index + n)
                .map(|i| Sample::new(i, i, SampleRng::new(0)))
                .collect())
        }
    }

    fn fixed(args: &PluginArgs) -> Result<Arc<dyn Source>> {
        Ok(Arc::new(Fixed(args.get_u64("fixed", "size", 3)? as usize)))
    }

    #[test]
    fn creates_registered_plugins() -> Result<()> {
        let mut registry = PluginRegistry::new();
        registry.register_source("fixed", fixed);

        let args = PluginArgs::from([("size".to_string(), json!(7))]);
        let source = registry.create_source("fixed", &args)?;
        assert_eq!(source.num_samples(Split::Train)?, 7);
        assert!(registry.has_output("identity"));
        assert_eq!(registry.source_names().collect::<Vec<_>>(), vec!["fixed"]);
        Ok(())
    }

    #[test]
    fn unknown_names_suggest_alternatives() {
        let mut registry = PluginRegistry::new();
        registry.register_source("fixed", fixed);

        let err = registry.create_source("fixd", &PluginArgs::new()).err().unwrap();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::UnknownPlugin {
                kind: "source",
                name: "fixd".into(),
                suggestion: Some("fixed".into()),
            })
        );
        assert!(registry.create_operation("augment", &PluginArgs::new()).is_err());
    }

    #[test]
    fn bad_arguments_are_typed_errors() {
        let mut registry = PluginRegistry::new();
        registry.register_source("fixed", fixed);

        let args = PluginArgs::from([("size".to_string(), json!("many"))]);
        let err = registry.create_source("fixed", &args).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidPluginArgs { .. })
        ));
    }

    #[test]
    fn string_lists_accept_single_strings() -> Result<()> {
        let args = PluginArgs::from([
            ("apply".to_string(), json!("train")),
            ("splits".to_string(), json!(["val", "test"])),
        ]);
        assert_eq!(args.get_str_list("op", "apply")?, Some(vec!["train".to_string()]));
        assert_eq!(
            args.get_str_list("op", "splits")?,
            Some(vec!["val".to_string(), "test".to_string()])
        );
        assert_eq!(args.get_str_list("op", "missing")?, None);
        assert_eq!(args.get_str("op", "apply")?, Some("train"));
        Ok(())
    }
}
