use anyhow::{bail, Result};
use sample_pipeline::{
    Configuration, NdArray, Output, Payload, PipelineError, PluginArgs, PluginArgsExt, Sample,
    Transform,
};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Precision {
    F32,
    F64,
}

/// Converts `x` into an [`NdArray`].
///
/// Numbers become one-element arrays and lists of numbers become vectors in
/// the configured `dtype` (`float32` or `float64`). Raw bytes become a `u8`
/// vector. Arrays pass through untouched.
pub struct ToArray {
    precision: Precision,
    args: PluginArgs,
}

impl ToArray {
    pub const NAME: &'static str = "to-array";

    pub fn create(args: &PluginArgs) -> Result<Arc<dyn Output>> {
        let precision = match args.get_str(Self::NAME, "dtype")?.unwrap_or("float32") {
            "float32" => Precision::F32,
            "float64" => Precision::F64,
            other => {
                return Err(PipelineError::InvalidPluginArgs {
                    name: Self::NAME.to_string(),
                    reason: format!("unsupported dtype '{}', expected float32 or float64", other),
                }
                .into())
            }
        };
        Ok(Arc::new(Self {
            precision,
            args: args.clone(),
        }))
    }

    fn floats(&self, values: Vec<f64>) -> Result<NdArray> {
        let shape = vec![values.len()];
        match self.precision {
            Precision::F32 => NdArray::from_vec(shape, values.into_iter().map(|v| v as f32).collect()),
            Precision::F64 => NdArray::from_vec(shape, values),
        }
    }

    fn convert(&self, payload: Payload) -> Result<NdArray> {
        match payload {
            Payload::Array(array) => Ok(array),
            Payload::Bytes(bytes) => NdArray::from_vec(vec![bytes.len()], bytes),
            Payload::Object(Value::Array(items)) => {
                let values = items
                    .iter()
                    .map(|item| match item.as_f64() {
                        Some(v) => Ok(v),
                        None => bail!("Cannot convert list element {} to a number", item),
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.floats(values)
            }
            Payload::Object(value) => match value.as_f64() {
                Some(v) => self.floats(vec![v]),
                None => bail!("Cannot convert {} to an array", value),
            },
        }
    }
}

impl Transform<Sample, Sample> for ToArray {
    fn apply(&self, sample: Sample) -> Result<Sample> {
        let x = self.convert(sample.x)?;
        Ok(Sample {
            x: Payload::Array(x),
            ..sample
        })
    }
}

impl Output for ToArray {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configuration(&self) -> Configuration {
        self.args.clone()
    }
}
