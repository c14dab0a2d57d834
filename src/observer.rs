/*!
Progress reporting for the inference engines.

Engines report to an [`Observer`] at fixed points: once before the first simulation, after every
simulator invocation, whenever a stage is finalized or rolled back, and once at the end. Every
method has a no-op default, so an observer only implements what it needs.

- [`Silent`] ignores everything.
- [`ProgressObserver`] draws an [`indicatif`] progress bar over the simulation budget.
- [`LogObserver`] forwards stage summaries to the [`log`] facade.
*/

use indicatif::{ProgressBar, ProgressStyle};

use crate::stats::StageSummary;

/// Receives progress notifications from an engine.
pub trait Observer {
    /// Called once before any simulation with the total number of simulations allowed.
    fn on_start(&mut self, _budget: usize) {}

    /// Called after each simulator invocation with the cumulative count.
    fn on_simulation(&mut self, _stage: usize, _sims_used: usize) {}

    fn on_stage_complete(&mut self, _summary: &StageSummary) {}

    /// Called when the budget ran out with `filled` of `target` particles accepted.
    fn on_rollback(&mut self, _stage: usize, _filled: usize, _target: usize) {}

    fn on_finish(&mut self, _n_stages: usize, _sims_used: usize) {}
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Observer for Silent {}

/// Shows a progress bar over the simulation budget.
#[derive(Default)]
pub struct ProgressObserver {
    pb: Option<ProgressBar>,
}

impl ProgressObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Observer for ProgressObserver {
    fn on_start(&mut self, budget: usize) {
        let style = ProgressStyle::default_bar()
            .template("{prefix:8} {bar:40.cyan/blue} {pos}/{len} ({eta}) | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        let pb = ProgressBar::new(budget as u64);
        pb.set_style(style);
        pb.set_prefix("Stage 1");
        self.pb = Some(pb);
    }

    fn on_simulation(&mut self, stage: usize, sims_used: usize) {
        if let Some(pb) = &self.pb {
            pb.set_position(sims_used as u64);
            pb.set_prefix(format!("Stage {stage}"));
        }
    }

    fn on_stage_complete(&mut self, summary: &StageSummary) {
        if let Some(pb) = &self.pb {
            pb.set_message(format!(
                "h≈{:.4} ESS≈{:.1}",
                summary.threshold, summary.ess
            ));
            pb.println(summary.to_string());
        }
    }

    fn on_rollback(&mut self, stage: usize, filled: usize, target: usize) {
        if let Some(pb) = &self.pb {
            pb.println(format!(
                "stage {stage}: budget exhausted after {filled}/{target} particles, discarded"
            ));
        }
    }

    fn on_finish(&mut self, n_stages: usize, sims_used: usize) {
        if let Some(pb) = self.pb.take() {
            pb.finish_with_message(format!("{n_stages} stages, {sims_used} sims"));
        }
    }
}

/// Writes stage summaries at `info` level and rollbacks at `warn` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_start(&mut self, budget: usize) {
        log::info!("starting ABC run with a budget of {budget} simulations");
    }

    fn on_stage_complete(&mut self, summary: &StageSummary) {
        log::info!("{summary}");
    }

    fn on_rollback(&mut self, stage: usize, filled: usize, target: usize) {
        log::warn!("stage {stage} rolled back with {filled}/{target} particles");
    }

    fn on_finish(&mut self, n_stages: usize, sims_used: usize) {
        log::info!("finished after {n_stages} stages and {sims_used} simulations");
    }
}

/// Silent when `silent` is set, a progress bar otherwise.
pub(crate) fn default_observer(silent: bool) -> Box<dyn Observer> {
    if silent {
        Box::new(Silent)
    } else {
        Box::new(ProgressObserver::new())
    }
}
