//! Particle tables and reference samples.
//!
//! A [`ParticleTable`] is the unit of work of every engine: one stage's batch of parameter
//! vectors, their summary statistics, distances and weights, with one row per particle. Tables
//! are values. Sorting, truncating and reweighting all return a new table, so a finalized
//! stage can be read by the next stage without any risk of it changing underneath.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::AbcError;
use crate::stats;

/// Row-major growable matrix used while a stage is being filled.
#[derive(Debug, Clone)]
pub(crate) struct RowBuffer {
    width: usize,
    data: Vec<f64>,
}

impl RowBuffer {
    pub(crate) fn new(width: usize) -> Self {
        Self {
            width,
            data: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, row: &[f64]) {
        debug_assert_eq!(row.len(), self.width);
        self.data.extend_from_slice(row);
    }

    pub(crate) fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.data.len() / self.width
        }
    }

    pub(crate) fn into_array(self) -> Result<Array2<f64>, AbcError> {
        let rows = self.len();
        Ok(Array2::from_shape_vec((rows, self.width), self.data)?)
    }
}

/// `(parameter, statistic)` pairs set aside to calibrate a distance.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSample {
    pub parameters: Array2<f64>,
    pub statistics: Array2<f64>,
}

impl ReferenceSample {
    pub fn len(&self) -> usize {
        self.parameters.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fills a [`ReferenceSample`] up to a fixed number of rows.
#[derive(Debug, Clone)]
pub(crate) struct ReferenceBuffer {
    cap: usize,
    parameters: RowBuffer,
    statistics: RowBuffer,
}

impl ReferenceBuffer {
    pub(crate) fn new(cap: usize, n_params: usize, n_stats: usize) -> Self {
        Self {
            cap,
            parameters: RowBuffer::new(n_params),
            statistics: RowBuffer::new(n_stats),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.statistics.len()
    }

    /// Stores the pair if the cap has not been reached. Returns whether it was stored.
    pub(crate) fn offer(&mut self, theta: &[f64], stat: &[f64]) -> bool {
        if self.len() >= self.cap {
            return false;
        }
        self.parameters.push(theta);
        self.statistics.push(stat);
        true
    }

    pub(crate) fn finish(self) -> Result<ReferenceSample, AbcError> {
        Ok(ReferenceSample {
            parameters: self.parameters.into_array()?,
            statistics: self.statistics.into_array()?,
        })
    }
}

/// Accumulates accepted particles during a fill step.
#[derive(Debug, Clone)]
pub(crate) struct TableBuilder {
    parameters: RowBuffer,
    statistics: RowBuffer,
    prior_density: Vec<f64>,
}

impl TableBuilder {
    pub(crate) fn new(n_params: usize, n_stats: usize) -> Self {
        Self {
            parameters: RowBuffer::new(n_params),
            statistics: RowBuffer::new(n_stats),
            prior_density: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.prior_density.len()
    }

    pub(crate) fn push(&mut self, theta: &[f64], stat: &[f64], prior_density: f64) {
        self.parameters.push(theta);
        self.statistics.push(stat);
        self.prior_density.push(prior_density);
    }

    /// Produces an unfinalized table: no distances, uniform provisional weights.
    pub(crate) fn finish(self) -> Result<ParticleTable, AbcError> {
        let n = self.prior_density.len();
        Ok(ParticleTable {
            parameters: self.parameters.into_array()?,
            statistics: self.statistics.into_array()?,
            distances: None,
            prior_density: Array1::from_vec(self.prior_density),
            weights: uniform(n),
        })
    }
}

fn uniform(n: usize) -> Array1<f64> {
    if n == 0 {
        Array1::zeros(0)
    } else {
        Array1::from_elem(n, 1.0 / n as f64)
    }
}

/// One stage's particles.
///
/// Rows of [`parameters`](Self::parameters), [`statistics`](Self::statistics),
/// [`distances`](Self::distances) and [`weights`](Self::weights) line up. Once an engine
/// finalizes a table it is sorted ascending by distance and its weights sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleTable {
    parameters: Array2<f64>,
    statistics: Array2<f64>,
    distances: Option<Array1<f64>>,
    prior_density: Array1<f64>,
    weights: Array1<f64>,
}

impl ParticleTable {
    pub fn empty(n_params: usize, n_stats: usize) -> Self {
        Self {
            parameters: Array2::zeros((0, n_params)),
            statistics: Array2::zeros((0, n_stats)),
            distances: Some(Array1::zeros(0)),
            prior_density: Array1::zeros(0),
            weights: Array1::zeros(0),
        }
    }

    pub fn len(&self) -> usize {
        self.parameters.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_params(&self) -> usize {
        self.parameters.ncols()
    }

    pub fn n_stats(&self) -> usize {
        self.statistics.ncols()
    }

    pub fn parameters(&self) -> ArrayView2<'_, f64> {
        self.parameters.view()
    }

    pub fn statistics(&self) -> ArrayView2<'_, f64> {
        self.statistics.view()
    }

    /// Distances under the stage's calibrated distance, `None` before calibration.
    pub fn distances(&self) -> Option<ArrayView1<'_, f64>> {
        self.distances.as_ref().map(|d| d.view())
    }

    /// Prior density of every particle at the time it was accepted.
    pub fn prior_density(&self) -> ArrayView1<'_, f64> {
        self.prior_density.view()
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    /// Attaches distances, one per row.
    pub(crate) fn with_distances(mut self, distances: Array1<f64>) -> Self {
        debug_assert_eq!(distances.len(), self.len());
        self.distances = Some(distances);
        self
    }

    /// Reorders rows ascending by distance. Ties keep their original order.
    pub(crate) fn sorted_by_distance(self) -> Self {
        let order: Vec<usize> = match &self.distances {
            None => return self,
            Some(d) => {
                let mut order: Vec<usize> = (0..d.len()).collect();
                order.sort_by(|&a, &b| d[a].total_cmp(&d[b]));
                order
            }
        };
        self.select(&order)
    }

    /// Keeps the rows at `indices`, in that order.
    pub(crate) fn select(&self, indices: &[usize]) -> Self {
        Self {
            parameters: self.parameters.select(Axis(0), indices),
            statistics: self.statistics.select(Axis(0), indices),
            distances: self.distances.as_ref().map(|d| d.select(Axis(0), indices)),
            prior_density: self.prior_density.select(Axis(0), indices),
            weights: self.weights.select(Axis(0), indices),
        }
    }

    /// Keeps the first `n` rows.
    pub(crate) fn truncated(self, n: usize) -> Self {
        if n >= self.len() {
            return self;
        }
        Self {
            parameters: self.parameters.slice(s![..n, ..]).to_owned(),
            statistics: self.statistics.slice(s![..n, ..]).to_owned(),
            distances: self.distances.map(|d| d.slice(s![..n]).to_owned()),
            prior_density: self.prior_density.slice(s![..n]).to_owned(),
            weights: self.weights.slice(s![..n]).to_owned(),
        }
    }

    pub(crate) fn with_uniform_weights(mut self) -> Self {
        self.weights = uniform(self.len());
        self
    }

    /// Replaces the weights, normalized to sum to one.
    pub(crate) fn with_weights(mut self, raw: Array1<f64>) -> Result<Self, AbcError> {
        let total = raw.sum();
        if raw.iter().any(|w| *w < 0.0 || !w.is_finite()) || !(total > 0.0) {
            return Err(AbcError::Weights(format!(
                "cannot normalize weights summing to {total}"
            )));
        }
        self.weights = raw / total;
        Ok(self)
    }

    /// Effective sample size of the importance weights.
    pub fn effective_sample_size(&self) -> f64 {
        stats::effective_sample_size(self.weights.view())
    }

    /// Importance-weighted mean of the parameters. `None` for an empty table.
    pub fn weighted_mean(&self) -> Option<Array1<f64>> {
        if self.is_empty() {
            return None;
        }
        Some(stats::weighted_mean(self.parameters.view(), self.weights.view()))
    }

    /// Largest distance in the table.
    pub fn max_distance(&self) -> Option<f64> {
        self.distances.as_ref()?.iter().copied().reduce(f64::max)
    }
}
