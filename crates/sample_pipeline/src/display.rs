use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::loader::{Progress, ProgressCallback};

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {wide_bar} {pos}/{len} samples ({eta})";

/// Terminal feedback for cache population: a log line when a phase starts
/// and a progress bar over its samples.
pub struct Display {
    bar: Mutex<Option<ProgressBar>>,
    visible: bool,
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

impl Display {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
            visible: true,
        }
    }

    /// Logs banners but never draws a bar.
    pub fn hidden() -> Self {
        Self {
            bar: Mutex::new(None),
            visible: false,
        }
    }

    /// Callback announcing `banner` when a phase starts and advancing the bar
    /// after every sample.
    pub fn progress(self: &Arc<Self>, banner: impl Into<String>) -> ProgressCallback {
        let display = Arc::clone(self);
        let banner = banner.into();
        Arc::new(move |progress: Progress| display.update(&banner, progress))
    }

    fn update(&self, banner: &str, progress: Progress) {
        let mut bar = self.bar.lock().expect("progress bar lock poisoned");
        match progress {
            Progress::Started { total } => {
                info!(total, "{}", banner);
                if let Some(old) = bar.take() {
                    old.finish_and_clear();
                }
                *bar = Some(self.new_bar(total as u64));
            }
            Progress::Advanced { current, total } => {
                let Some(pb) = bar.as_ref() else {
                    return;
                };
                pb.set_position(current as u64 + 1);
                if current + 1 >= total {
                    pb.finish_and_clear();
                    *bar = None;
                }
            }
        }
    }

    fn new_bar(&self, len: u64) -> ProgressBar {
        let pb = ProgressBar::new(len);
        if !self.visible {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        pb.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        pb
    }
}
