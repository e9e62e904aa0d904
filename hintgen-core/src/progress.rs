//! Progress reporting for batch hint-chain validation.
//!
//! The CLI shows a bar through `BarProgress`; library callers and tests use
//! `SilentProgress`.

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};

use crate::chain::{ChainOutcome, ChainReport};

/// Observer for a batch of chain runs.
pub trait ChainProgress: Send + Sync {
    /// A batch of `total` submissions is about to run.
    fn begin(&self, total: u64);

    /// One submission's chain finished.
    fn completed(&self, label: &str, report: &ChainReport);

    /// The batch is done.
    fn finish(&self);
}

#[derive(Debug, Default)]
pub struct SilentProgress;

impl ChainProgress for SilentProgress {
    fn begin(&self, _total: u64) {}
    fn completed(&self, _label: &str, _report: &ChainReport) {}
    fn finish(&self) {}
}

/// Terminal progress bar with a running count of successful chains.
#[derive(Debug)]
pub struct BarProgress {
    bar: ProgressBar,
    succeeded: Mutex<u64>,
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BarProgress {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            succeeded: Mutex::new(0),
        }
    }

    /// Draw to stderr instead of staying hidden.
    pub fn visible() -> Self {
        Self {
            bar: ProgressBar::new(0),
            succeeded: Mutex::new(0),
        }
    }
}

impl ChainProgress for BarProgress {
    fn begin(&self, total: u64) {
        let style = ProgressStyle::with_template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} ({eta})")
            .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("=> "));
        self.bar.set_style(style);
        self.bar.set_length(total);
        self.bar.set_message("validating hint chains");
        self.bar.reset();
        if let Ok(mut n) = self.succeeded.lock() {
            *n = 0;
        }
    }

    fn completed(&self, label: &str, report: &ChainReport) {
        let succeeded = match self.succeeded.lock() {
            Ok(mut n) => {
                if matches!(report.outcome, ChainOutcome::Success | ChainOutcome::StartedCorrect) {
                    *n += 1;
                }
                *n
            }
            Err(_) => 0,
        };
        if !matches!(report.outcome, ChainOutcome::Success | ChainOutcome::StartedCorrect) {
            self.bar
                .println(format!("{label}: {} after {} steps", report.outcome, report.steps));
        }
        self.bar.set_message(format!("{succeeded} converged"));
        self.bar.inc(1);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
