//! Progress reporting (spec.md §4.F, §9).
//!
//! Isolated behind a trait so progress bars and CPU/RAM gauges never touch
//! control flow (spec.md §9: "isolate behind a `Reporter` trait with a
//! no-op implementation for test runs"). The real implementation backs onto
//! `indicatif`, already a dependency of the teacher repository.

use indicatif::{ProgressBar, ProgressStyle};

use crate::resources::ResourceSnapshot;

pub trait Reporter: Send + Sync {
    fn alignment_started(&self, total: usize);
    fn alignment_progress(&self, done: usize, total: usize);
    fn alignment_finished(&self, succeeded: usize, failed: usize);
}

/// Used by every unit test and anywhere progress output would be noise.
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn alignment_started(&self, _total: usize) {}
    fn alignment_progress(&self, _done: usize, _total: usize) {}
    fn alignment_finished(&self, _succeeded: usize, _failed: usize) {}
}

/// Renders a `[done/total]` counter plus a rolling CPU/RAM line, per
/// spec.md §4.F's progress contract.
pub struct IndicatifReporter {
    bar: ProgressBar,
}

impl IndicatifReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "[{pos}/{len}] aligning frames {wide_bar} eta {eta} — {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        IndicatifReporter { bar }
    }

    fn resource_line(&self) -> String {
        let snapshot = ResourceSnapshot::current();
        format!(
            "{:.1} GB free, {} threads",
            snapshot.available_mem_gb, snapshot.available_threads
        )
    }
}

impl Default for IndicatifReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for IndicatifReporter {
    fn alignment_started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_message(self.resource_line());
    }

    fn alignment_progress(&self, done: usize, _total: usize) {
        self.bar.set_position(done as u64);
        self.bar.set_message(self.resource_line());
    }

    fn alignment_finished(&self, succeeded: usize, failed: usize) {
        self.bar
            .finish_with_message(format!("{succeeded} succeeded, {failed} failed"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_reporter_accepts_any_sequence_of_calls() {
        let reporter = NoopReporter;
        reporter.alignment_started(5);
        reporter.alignment_progress(1, 5);
        reporter.alignment_progress(5, 5);
        reporter.alignment_finished(4, 1);
    }
}
