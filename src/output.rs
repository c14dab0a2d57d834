//! Run-level results of the population Monte Carlo engines.

use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::distance::{Distance, DistanceMetric};
use crate::error::AbcError;
use crate::particles::{ParticleTable, ReferenceSample};
use crate::stats::StageSummary;

/// One completed stage.
#[derive(Debug, Clone)]
pub struct Stage<M: DistanceMetric> {
    /// Finalized particles: sorted by distance, weights summing to one.
    pub table: ParticleTable,
    /// Distance the stage's particles were ranked with.
    pub distance: Distance<M>,
    /// Acceptance cutoff gating the following stage.
    pub threshold: f64,
    /// Cumulative simulator invocations at the end of the stage.
    pub sims: usize,
    /// The stage's reference sample, when the run was asked to keep it.
    pub reference: Option<ReferenceSample>,
    pub summary: StageSummary,
}

/// All stages of a run, in order.
///
/// The per-stage sequences returned by [`thresholds`](Self::thresholds),
/// [`distances`](Self::distances) and [`sims`](Self::sims) are aligned with
/// [`stages`](Self::stages), even when consecutive stages share the same distance.
#[derive(Debug, Clone)]
pub struct PmcOutput<M: DistanceMetric> {
    stages: Vec<Stage<M>>,
    n_params: usize,
    n_stats: usize,
    total_sims: usize,
}

/// Every stage's particles stacked row-wise.
#[derive(Debug, Clone, PartialEq)]
pub struct StackedOutput {
    /// 1-based stage index of each row.
    pub stage: Array1<usize>,
    pub parameters: Array2<f64>,
    pub statistics: Array2<f64>,
    pub distances: Array1<f64>,
    pub weights: Array1<f64>,
}

impl<M: DistanceMetric> PmcOutput<M> {
    pub(crate) fn new(n_params: usize, n_stats: usize) -> Self {
        Self {
            stages: Vec::new(),
            n_params,
            n_stats,
            total_sims: 0,
        }
    }

    pub(crate) fn push(&mut self, stage: Stage<M>) {
        self.stages.push(stage);
    }

    pub(crate) fn set_total_sims(&mut self, sims: usize) {
        self.total_sims = sims;
    }

    /// Number of completed stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Stage<M>] {
        &self.stages
    }

    pub fn final_stage(&self) -> Option<&Stage<M>> {
        self.stages.last()
    }

    pub fn thresholds(&self) -> Vec<f64> {
        self.stages.iter().map(|s| s.threshold).collect()
    }

    pub fn distances(&self) -> Vec<&Distance<M>> {
        self.stages.iter().map(|s| &s.distance).collect()
    }

    /// Cumulative simulation count at each stage boundary.
    pub fn sims(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.sims).collect()
    }

    pub fn summaries(&self) -> Vec<&StageSummary> {
        self.stages.iter().map(|s| &s.summary).collect()
    }

    /// Every simulator invocation of the run, including those of a discarded partial stage.
    pub fn total_sims(&self) -> usize {
        self.total_sims
    }

    /// Importance-weighted parameter mean of the final stage.
    pub fn posterior_mean(&self) -> Option<Array1<f64>> {
        self.final_stage()?.table.weighted_mean()
    }

    pub fn stacked(&self) -> Result<StackedOutput, AbcError> {
        let tables: Vec<&ParticleTable> = self.stages.iter().map(|s| &s.table).collect();
        let stage: Array1<usize> = self
            .stages
            .iter()
            .enumerate()
            .flat_map(|(i, s)| std::iter::repeat(i + 1).take(s.table.len()))
            .collect();
        let distances: Vec<ArrayView1<f64>> = tables.iter().filter_map(|t| t.distances()).collect();
        Ok(StackedOutput {
            stage,
            parameters: stack_rows(
                tables.iter().map(|t| t.parameters()).collect(),
                self.n_params,
            )?,
            statistics: stack_rows(
                tables.iter().map(|t| t.statistics()).collect(),
                self.n_stats,
            )?,
            distances: stack_values(distances)?,
            weights: stack_values(tables.iter().map(|t| t.weights()).collect())?,
        })
    }
}

fn stack_rows(views: Vec<ArrayView2<f64>>, width: usize) -> Result<Array2<f64>, AbcError> {
    if views.is_empty() {
        return Ok(Array2::zeros((0, width)));
    }
    Ok(concatenate(Axis(0), &views)?)
}

fn stack_values(views: Vec<ArrayView1<f64>>) -> Result<Array1<f64>, AbcError> {
    if views.is_empty() {
        return Ok(Array1::zeros(0));
    }
    Ok(concatenate(Axis(0), &views)?)
}
