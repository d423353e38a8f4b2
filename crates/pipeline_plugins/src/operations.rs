use anyhow::{bail, Result};
use rand::Rng;
use sample_pipeline::{
    Configuration, DType, NdArray, Operation, Payload, PipelineError, PluginArgs, PluginArgsExt,
    Sample, Split,
};
use std::sync::Arc;

/// Reads the `apply` option: the splits an operation runs on.
fn apply_splits(plugin: &str, args: &PluginArgs, default: &[Split]) -> Result<Vec<Split>> {
    match args.get_str_list(plugin, "apply")? {
        None => Ok(default.to_vec()),
        Some(names) => names
            .iter()
            .map(|name| -> Result<Split> {
                name.parse::<Split>().map_err(|err| {
                    PipelineError::InvalidPluginArgs {
                        name: plugin.to_string(),
                        reason: err.to_string(),
                    }
                    .into()
                })
            })
            .collect(),
    }
}

/// Applies `f` to a numeric payload: a JSON number or every element of a float array.
fn map_numeric(payload: &Payload, mut f: impl FnMut(f64) -> f64) -> Result<Payload> {
    match payload {
        Payload::Object(value) => match value.as_f64() {
            Some(v) => Ok(Payload::from(f(v))),
            None => bail!("Expected a numeric payload, got {}", value),
        },
        Payload::Array(array) => match array.dtype() {
            DType::F32 => {
                let values: Vec<f32> = array
                    .to_vec::<f32>()?
                    .into_iter()
                    .map(|v| f(v as f64) as f32)
                    .collect();
                Ok(NdArray::from_vec(array.shape().to_vec(), values)?.into())
            }
            DType::F64 => {
                let values: Vec<f64> = array.to_vec::<f64>()?.into_iter().map(f).collect();
                Ok(NdArray::from_vec(array.shape().to_vec(), values)?.into())
            }
            other => bail!("Expected a floating point array, got {:?}", other),
        },
        Payload::Bytes(_) => bail!("Expected a numeric payload, got raw bytes"),
    }
}

/// Produces `variants` jittered copies of every sample.
///
/// Each copy adds noise uniform in `[-amount, amount)` to `x`, drawn from the
/// sample's own generator, and records its number as the `variant` meta entry.
pub struct Augment {
    variants: usize,
    amount: f64,
    splits: Vec<Split>,
    args: PluginArgs,
}

impl Augment {
    pub const NAME: &'static str = "augment";

    pub fn create(args: &PluginArgs) -> Result<Arc<dyn Operation>> {
        let variants = args.get_u64(Self::NAME, "variants", 2)? as usize;
        let amount = args.get_f64(Self::NAME, "amount", 0.1)?;
        if variants == 0 || amount < 0.0 {
            return Err(PipelineError::InvalidPluginArgs {
                name: Self::NAME.to_string(),
                reason: format!(
                    "need variants >= 1 and amount >= 0, got variants={}, amount={}",
                    variants, amount
                ),
            }
            .into());
        }
        Ok(Arc::new(Self {
            variants,
            amount,
            splits: apply_splits(Self::NAME, args, &[Split::Train])?,
            args: args.clone(),
        }))
    }
}

impl Operation for Augment {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configuration(&self) -> Configuration {
        self.args.clone()
    }

    fn multiplier(&self) -> f64 {
        self.variants as f64
    }

    fn applies_to(&self, split: Split) -> bool {
        self.splits.contains(&split)
    }

    fn process(&self, sample: Sample) -> Result<Vec<Sample>> {
        let mut rng = sample.rng.clone();
        (0..self.variants)
            .map(|variant| -> Result<Sample> {
                let amount = self.amount;
                let x = map_numeric(&sample.x, |v| {
                    if amount > 0.0 {
                        v + rng.random_range(-amount..amount)
                    } else {
                        v
                    }
                })?;
                Ok(Sample {
                    x,
                    ..sample.clone()
                }
                .with_meta("variant", variant))
            })
            .collect()
    }
}

/// Multiplies numeric `x` by `factor`.
pub struct Scale {
    factor: f64,
    splits: Vec<Split>,
    args: PluginArgs,
}

impl Scale {
    pub const NAME: &'static str = "scale";

    pub fn create(args: &PluginArgs) -> Result<Arc<dyn Operation>> {
        Ok(Arc::new(Self {
            factor: args.get_f64(Self::NAME, "factor", 1.0)?,
            splits: apply_splits(Self::NAME, args, &Split::ALL)?,
            args: args.clone(),
        }))
    }
}

impl Operation for Scale {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configuration(&self) -> Configuration {
        self.args.clone()
    }

    fn applies_to(&self, split: Split) -> bool {
        self.splits.contains(&split)
    }

    fn process(&self, sample: Sample) -> Result<Vec<Sample>> {
        let x = map_numeric(&sample.x, |v| v * self.factor)?;
        Ok(vec![Sample { x, ..sample }])
    }
}
