use anyhow::{Context, Result};
use sample_pipeline::{BatchOptions, Data, DataOptions, Display, PipelineConfig, Split};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = r#"{
    "cache": "mem",
    "input": { "type": "range", "train": 1000, "classes": 10 },
    "preprocess": [{ "op": "augment", "variants": 2 }],
    "output": { "type": "to-array" }
}"#;

const BATCHES: usize = 5;

/// `PIPELINE_LOG` first, then `RUST_LOG`, then `info`.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("PIPELINE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Sets the returned flag on the first Ctrl-C and exits on the second.
fn interrupt_on_ctrl_c() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        warn!("interrupted, stopping (press Ctrl-C again to exit now)");
    })
    .context("Failed to install the Ctrl-C handler")?;
    Ok(flag)
}

/// Usage: `pipeline-demo [config.json]`
///
/// Builds the configured pipeline and logs the first few training batches.
fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::from_file(&path)
            .with_context(|| format!("Failed to load pipeline config {}", path))?,
        None => PipelineConfig::from_json(DEFAULT_CONFIG)?,
    };
    let registry = pipeline_plugins::registry();
    let interrupt = interrupt_on_ctrl_c()?;
    let options = DataOptions {
        display: Some(Arc::new(Display::new())),
        interrupt: Some(interrupt.clone()),
        ..config.data_options()
    };
    let data = Data::from_config_with_options(&config, &registry, options)?;

    for split in Split::ALL {
        info!(split = %split, samples = data.num_samples(split)?, "split ready");
    }

    let view_options = data.view_options().randomize(true).build();
    let batches = data.batches(Split::Train, view_options, BatchOptions::default().batch_size(16))?;
    info!(batches = batches.len(), "streaming training batches");

    for (i, batch) in batches.take(BATCHES).enumerate() {
        if interrupt.load(Ordering::SeqCst) {
            break;
        }
        let batch = batch?;
        info!(batch = i, size = batch.len(), "{:?}", batch);
    }
    Ok(())
}
