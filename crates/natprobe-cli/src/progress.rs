//! Per-server classification spinners.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use natprobe_discovery::{ClassificationResult, ClassifyError};
use std::time::Duration;

/// Spinner tracking one classification
pub struct ServerProgress {
    bar: ProgressBar,
}

impl ServerProgress {
    /// Add a spinner for `server` to `multi`
    #[must_use]
    pub fn new(multi: &MultiProgress, server: &str) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());

        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{elapsed}] {prefix:.bold} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix(server.to_string());
        bar.set_message("classifying...");
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Replace the spinner with the outcome
    pub fn finish(&self, outcome: &Result<ClassificationResult, ClassifyError>) {
        let msg = match outcome {
            Ok(result) => format!("{}", style(result.nat_type()).green()),
            Err(e) => format!("{}", style(e).red()),
        };
        self.bar.finish_with_message(msg);
    }
}

/// Spinner group, drawn to stderr unless `hidden`
#[must_use]
pub fn progress_group(hidden: bool) -> MultiProgress {
    if hidden {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::stderr())
    }
}
