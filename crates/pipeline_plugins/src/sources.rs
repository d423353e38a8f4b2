use anyhow::{ensure, Context, Result};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use sample_pipeline::{
    Configuration, Meta, Payload, PipelineError, PluginArgs, PluginArgsExt, Sample, SampleRng,
    Source, Split,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use walkdir::WalkDir;

const DEFAULT_SEED: u64 = 2204;

/// Synthetic integer dataset: sample `i` has `x = i` and `y = i % classes`.
pub struct RangeSource {
    sizes: [usize; 3],
    classes: u64,
    seed: u64,
    args: PluginArgs,
}

impl RangeSource {
    pub const NAME: &'static str = "range";

    pub fn create(args: &PluginArgs) -> Result<Arc<dyn Source>> {
        let size = |split: Split, default| args.get_u64(Self::NAME, split.as_str(), default);
        let classes = args.get_u64(Self::NAME, "classes", 2)?;
        if classes == 0 {
            return Err(PipelineError::InvalidPluginArgs {
                name: Self::NAME.to_string(),
                reason: "'classes' must be at least 1".to_string(),
            }
            .into());
        }
        Ok(Arc::new(Self {
            sizes: [
                size(Split::Train, 100)? as usize,
                size(Split::Val, 10)? as usize,
                size(Split::Test, 20)? as usize,
            ],
            classes,
            seed: args.get_u64(Self::NAME, "seed", DEFAULT_SEED)?,
            args: args.clone(),
        }))
    }

    fn size(&self, split: Split) -> usize {
        match split {
            Split::Train => self.sizes[0],
            Split::Val => self.sizes[1],
            Split::Test => self.sizes[2],
        }
    }
}

impl Source for RangeSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configuration(&self) -> Configuration {
        self.args.clone()
    }

    fn num_samples(&self, split: Split) -> Result<usize> {
        Ok(self.size(split))
    }

    fn read_samples(&self, split: Split, index: usize, n: usize) -> Result<Vec<Sample>> {
        let len = self.size(split);
        ensure!(
            index + n <= len,
            PipelineError::IndexOutOfRange {
                index: (index + n) as isize - 1,
                len,
            }
        );
        Ok((index..index + n)
            .map(|i| {
                Sample::new(i, i % self.classes as usize, SampleRng::for_index(self.seed, i))
                    .with_meta("index", i)
            })
            .collect())
    }

    fn meta(&self) -> Meta {
        let mut meta = Meta::new();
        meta.insert("classes".into(), json!(self.classes));
        meta
    }
}

/// One file of a [`DirectorySource`].
#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    label: usize,
}

/// Files under a directory, labelled by their first-level sub-directory.
///
/// Every file is one sample with its raw bytes as `x` and the label index as
/// `y`. Files are shuffled once with `seed`; the first `test-split` go to the
/// test split, the next `val-split` to validation and the rest to training.
/// Split sizes below 1 are fractions of all files.
pub struct DirectorySource {
    root: PathBuf,
    labels: Vec<String>,
    splits: [Vec<Entry>; 3],
    seed: u64,
    args: PluginArgs,
}

impl DirectorySource {
    pub const NAME: &'static str = "directory";

    pub fn create(args: &PluginArgs) -> Result<Arc<dyn Source>> {
        let root = args
            .get_str(Self::NAME, "path")?
            .map(PathBuf::from)
            .ok_or_else(|| PipelineError::InvalidPluginArgs {
                name: Self::NAME.to_string(),
                reason: "'path' is required".to_string(),
            })?;
        let val_split = args.get_f64(Self::NAME, "val-split", 0.1)?;
        let test_split = args.get_f64(Self::NAME, "test-split", 0.1)?;
        let seed = args.get_u64(Self::NAME, "seed", DEFAULT_SEED)?;
        Ok(Arc::new(Self::scan(root, val_split, test_split, seed, args.clone())?))
    }

    fn scan(root: PathBuf, val_split: f64, test_split: f64, seed: u64, args: PluginArgs) -> Result<Self> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).min_depth(2).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to scan {}", root.display()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        let label_of = |path: &Path| -> Option<String> {
            let relative = path.strip_prefix(&root).ok()?;
            relative
                .components()
                .next()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
        };
        let labels: Vec<String> = files
            .iter()
            .filter_map(|p| label_of(p.as_path()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut entries: Vec<Entry> = files
            .into_iter()
            .filter_map(|path| {
                let label = label_of(path.as_path())?;
                let label = labels.iter().position(|l| *l == label)?;
                Some(Entry { path, label })
            })
            .collect();
        entries.shuffle(&mut StdRng::seed_from_u64(seed));

        let total = entries.len();
        let count = |split: f64| -> usize {
            if split < 1.0 {
                (total as f64 * split) as usize
            } else {
                (split as usize).min(total)
            }
        };
        let n_test = count(test_split);
        let n_val = count(val_split).min(total - n_test);
        let train = entries.split_off(n_test + n_val);
        let val = entries.split_off(n_test);
        let mut splits = [train, val, entries];
        for split in &mut splits {
            split.sort_by(|a, b| a.path.cmp(&b.path));
        }

        debug!(
            root = %root.display(),
            labels = labels.len(),
            train = splits[0].len(),
            val = splits[1].len(),
            test = splits[2].len(),
            "scanned directory source"
        );
        Ok(Self {
            root,
            labels,
            splits,
            seed,
            args,
        })
    }

    fn entries(&self, split: Split) -> &[Entry] {
        match split {
            Split::Train => &self.splits[0],
            Split::Val => &self.splits[1],
            Split::Test => &self.splits[2],
        }
    }
}

impl Source for DirectorySource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configuration(&self) -> Configuration {
        self.args.clone()
    }

    fn num_samples(&self, split: Split) -> Result<usize> {
        Ok(self.entries(split).len())
    }

    fn read_samples(&self, split: Split, index: usize, n: usize) -> Result<Vec<Sample>> {
        let entries = self.entries(split);
        let selected = entries.get(index..index + n).ok_or(PipelineError::IndexOutOfRange {
            index: (index + n) as isize - 1,
            len: entries.len(),
        })?;
        selected
            .iter()
            .enumerate()
            .map(|(offset, entry)| -> Result<Sample> {
                let bytes = std::fs::read(&entry.path)
                    .with_context(|| format!("Failed to read {}", entry.path.display()))?;
                let relative = entry.path.strip_prefix(&self.root).unwrap_or(&entry.path);
                Ok(Sample::new(
                    Payload::Bytes(bytes),
                    entry.label,
                    SampleRng::for_index(self.seed, index + offset),
                )
                .with_meta("filename", relative.to_string_lossy().into_owned()))
            })
            .collect()
    }

    fn meta(&self) -> Meta {
        let mut meta = Meta::new();
        meta.insert("labels".into(), json!(self.labels));
        meta
    }
}
